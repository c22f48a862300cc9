//! Secreto compartido del panel de administración.

use subtle::ConstantTimeEq;

use crate::error::{TreeError, TreeResult};

#[derive(Clone)]
pub struct SharedSecret(String);

impl SharedSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Comparación en tiempo constante. Un candidato ausente falla igual que
    /// uno incorrecto.
    pub fn verify(&self, candidate: Option<&str>) -> TreeResult<()> {
        let candidate = candidate.unwrap_or_default();
        if bool::from(self.0.as_bytes().ct_eq(candidate.as_bytes())) {
            Ok(())
        } else {
            Err(TreeError::AuthFailure)
        }
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret(***)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_exact_secret_passes() {
        let secret = SharedSecret::new("admin123");
        assert!(secret.verify(Some("admin123")).is_ok());
        for wrong in [Some("admin12"), Some("admin1234"), Some(""), None] {
            assert!(matches!(secret.verify(wrong), Err(TreeError::AuthFailure)));
        }
    }

    #[test]
    fn debug_output_hides_the_secret() {
        assert!(!format!("{:?}", SharedSecret::new("admin123")).contains("admin123"));
    }
}
