//! Taxonomía de errores del catálogo.
//!
//! `NotFound` es un resultado esperado en todas las rutas de lectura y
//! entrega; quien lo recibe lo traduce a "ya no está disponible".

use thiserror::Error;

use crate::models::NodeId;

#[derive(Debug, Error)]
pub enum TreeError {
    /// Petición de creación mal formada. No se escribe nada.
    #[error("nodo inválido: {0}")]
    InvalidNode(String),

    /// El padre indicado no existe (o no es una carpeta).
    #[error("padre inexistente: {0}")]
    DanglingParent(String),

    #[error("nodo no encontrado: {0}")]
    NotFound(NodeId),

    /// Mismo mensaje sea cual sea la comprobación que falló.
    #[error("autenticación fallida")]
    AuthFailure,

    /// Fallo de E/S del store o de la capacidad de entrega.
    #[error("servicio no disponible: {0}")]
    Unavailable(String),
}

impl TreeError {
    /// Código estable para las respuestas de la API.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidNode(_) => "INVALID_NODE",
            Self::DanglingParent(_) => "DANGLING_PARENT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::AuthFailure => "AUTH_FAILURE",
            Self::Unavailable(_) => "UNAVAILABLE",
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidNode(message.into())
    }

    pub fn unavailable(source: impl std::fmt::Display) -> Self {
        Self::Unavailable(source.to_string())
    }
}

impl From<neo4rs::Error> for TreeError {
    fn from(err: neo4rs::Error) -> Self {
        Self::unavailable(err)
    }
}

impl From<reqwest::Error> for TreeError {
    fn from(err: reqwest::Error) -> Self {
        Self::unavailable(err)
    }
}

pub type TreeResult<T> = Result<T, TreeError>;
