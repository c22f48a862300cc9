//! Carga y gestión de configuración de la aplicación (store + bot + panel).

use std::env;
use anyhow::{anyhow, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Neo4j,
    Memory,
}

impl StoreBackend {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "neo4j" => Ok(Self::Neo4j),
            "memory" => Ok(Self::Memory),
            other => Err(anyhow!("Backend de store no soportado: {other}")),
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub frontend_dir: String,

    /// Secreto compartido del panel de administración.
    pub admin_pass: String,
    /// Identidad de chat del administrador (captura de referencias).
    pub admin_id: Option<String>,

    pub telegram_token: Option<String>,
    pub telegram_api_url: String,

    pub store_backend: StoreBackend,
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Igual que `from_env`, pero leyendo de una función arbitraria.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let admin_pass = non_empty("ADMIN_PASS")
            .ok_or_else(|| anyhow!("Falta ADMIN_PASS en el entorno"))?;
        let admin_id = non_empty("ADMIN_ID");

        let server_addr = match non_empty("SERVER_ADDR") {
            Some(addr) => addr,
            None => {
                let port = non_empty("PORT").unwrap_or_else(|| "10000".to_string());
                let port: u16 = port
                    .parse()
                    .map_err(|_| anyhow!("PORT no es un puerto válido: {port}"))?;
                format!("0.0.0.0:{port}")
            }
        };
        let frontend_dir = non_empty("FRONTEND_DIR").unwrap_or_else(|| "frontend".to_string());

        let telegram_token = non_empty("TELEGRAM_TOKEN");
        let telegram_api_url = non_empty("TELEGRAM_API_URL")
            .unwrap_or_else(|| "https://api.telegram.org".to_string());

        let store_backend =
            StoreBackend::from_str(&non_empty("STORE_BACKEND").unwrap_or_else(|| "neo4j".to_string()))?;

        let (neo4j_uri, neo4j_user, neo4j_password) = match store_backend {
            StoreBackend::Neo4j => (
                non_empty("NEO4J_URI").ok_or_else(|| anyhow!("Falta NEO4J_URI en el entorno"))?,
                non_empty("NEO4J_USER").ok_or_else(|| anyhow!("Falta NEO4J_USER en el entorno"))?,
                non_empty("NEO4J_PASSWORD")
                    .ok_or_else(|| anyhow!("Falta NEO4J_PASSWORD en el entorno"))?,
            ),
            StoreBackend::Memory => (
                non_empty("NEO4J_URI").unwrap_or_default(),
                non_empty("NEO4J_USER").unwrap_or_default(),
                non_empty("NEO4J_PASSWORD").unwrap_or_default(),
            ),
        };

        Ok(Self {
            server_addr,
            frontend_dir,
            admin_pass,
            admin_id,
            telegram_token,
            telegram_api_url,
            store_backend,
            neo4j_uri,
            neo4j_user,
            neo4j_password,
        })
    }
}
