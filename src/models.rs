//! Modelos de dominio del catálogo (nodos carpeta/fichero).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identificador opaco de un nodo. Lo asigna el store al crear el nodo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for NodeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Tipo de nodo. En el wire se serializa como `"folder"` / `"file"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Folder,
    File,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Folder => "folder",
            Self::File => "file",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "folder" => Some(Self::Folder),
            "file" => Some(Self::File),
            _ => None,
        }
    }
}

/// Referencia opaca a contenido externo (p. ej. el `file_id` de Telegram).
/// El núcleo nunca la interpreta.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileRef(String);

impl FileRef {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Un nodo del catálogo. Inmutable tras su creación: la única mutación
/// posible es el borrado.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
    /// Presente si y sólo si `kind == File`.
    pub file_ref: Option<FileRef>,
    /// `None` es la única representación de "sin padre" (nodo raíz).
    pub parent_id: Option<NodeId>,
    pub created_at: DateTime<Utc>,
}

impl Node {
    pub fn is_folder(&self) -> bool {
        self.kind == NodeKind::Folder
    }
}

/// Petición de creación ya tipada; la valida el store.
#[derive(Debug, Clone)]
pub struct NewNode {
    pub name: String,
    pub kind: NodeKind,
    pub file_ref: Option<FileRef>,
    pub parent_id: Option<NodeId>,
}

impl NewNode {
    pub fn folder(name: impl Into<String>, parent_id: Option<NodeId>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Folder,
            file_ref: None,
            parent_id,
        }
    }

    pub fn file(name: impl Into<String>, file_ref: FileRef, parent_id: Option<NodeId>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::File,
            file_ref: Some(file_ref),
            parent_id,
        }
    }
}
