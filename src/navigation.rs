//! Motor de navegación sin estado.
//!
//! El único estado de una conversación es la `Action` que el usuario acaba de
//! pulsar. "Atrás" no consulta ningún historial: vuelve a leer el nodo actual
//! en el store y pinta su padre.

use std::fmt;
use std::sync::Arc;

use crate::{
    error::{TreeError, TreeResult},
    models::{Node, NodeId, NodeKind},
    store::TreeStore,
};

pub const ROOT_TITLE: &str = "📚 *Material de estudio*\nElige una carpeta o un fichero:";
pub const UNAVAILABLE_NOTICE: &str = "⚠️ Ese elemento ya no está disponible.";
pub const BACK_LABEL: &str = "🔙 Atrás";

const ROOT_TOKEN: &str = "root";

/// Acción codificada en cada botón (`open:<id>`, `file:<id>`, `back:<id>`).
/// Se parsea una sola vez en la frontera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// `None` es la raíz.
    Open(Option<NodeId>),
    OpenFile(NodeId),
    /// Id de la carpeta desde la que se pulsa "atrás"; `None` en la raíz.
    Back(Option<NodeId>),
}

impl Action {
    pub fn parse(data: &str) -> TreeResult<Self> {
        let (tag, raw_id) = data
            .split_once(':')
            .ok_or_else(|| TreeError::invalid(format!("acción sin separador: {data}")))?;

        let folder = |raw: &str| -> TreeResult<Option<NodeId>> {
            if raw == ROOT_TOKEN || raw == "None" {
                return Ok(None);
            }
            raw.parse()
                .map(Some)
                .map_err(|_| TreeError::invalid(format!("id inválido en acción: {raw}")))
        };

        match tag {
            "open" => Ok(Self::Open(folder(raw_id)?)),
            "back" => Ok(Self::Back(folder(raw_id)?)),
            "file" => raw_id
                .parse()
                .map(Self::OpenFile)
                .map_err(|_| TreeError::invalid(format!("id inválido en acción: {raw_id}"))),
            other => Err(TreeError::invalid(format!("acción desconocida: {other}"))),
        }
    }

    /// Forma serializada; cabe en los 64 bytes de `callback_data`.
    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn folder(id: &Option<NodeId>) -> String {
            id.map(|id| id.to_string()).unwrap_or_else(|| ROOT_TOKEN.to_string())
        }
        match self {
            Self::Open(id) => write!(f, "open:{}", folder(id)),
            Self::OpenFile(id) => write!(f, "file:{id}"),
            Self::Back(id) => write!(f, "back:{}", folder(id)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuEntry {
    pub label: String,
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Menu {
    pub title: String,
    pub entries: Vec<MenuEntry>,
    pub back: Option<Action>,
    /// Aviso para el usuario (p. ej. la carpeta pedida ya no existe).
    pub notice: Option<String>,
}

impl Menu {
    /// Texto del mensaje, con el aviso delante si lo hay.
    pub fn text(&self) -> String {
        match &self.notice {
            Some(notice) => format!("{notice}\n\n{}", self.title),
            None => self.title.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Menu(Menu),
    /// El usuario eligió un fichero; el estado no cambia.
    Deliver(Node),
}

/// Escapa los caracteres especiales del Markdown clásico de Telegram.
fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn entry_for(node: &Node) -> MenuEntry {
    match node.kind {
        NodeKind::Folder => MenuEntry {
            label: format!("📁 {}", node.name),
            action: Action::Open(Some(node.id)),
        },
        NodeKind::File => MenuEntry {
            label: format!("📄 {}", node.name),
            action: Action::OpenFile(node.id),
        },
    }
}

#[derive(Clone)]
pub struct Navigator {
    store: Arc<dyn TreeStore>,
}

impl Navigator {
    pub fn new(store: Arc<dyn TreeStore>) -> Self {
        Self { store }
    }

    /// Menú de la carpeta `current` (raíz si `None`).
    pub async fn render(&self, current: Option<NodeId>) -> TreeResult<Menu> {
        let Some(id) = current else {
            return self.render_root(None).await;
        };
        match self.store.get(id).await {
            Ok(folder) => self.render_folder(&folder).await,
            Err(TreeError::NotFound(_)) => self.render_root(Some(UNAVAILABLE_NOTICE)).await,
            Err(e) => Err(e),
        }
    }

    pub async fn resolve(&self, action: Action) -> TreeResult<Outcome> {
        let target = match action {
            Action::Open(None) | Action::Back(None) => {
                return self.render_root(None).await.map(Outcome::Menu)
            }
            Action::Open(Some(id)) | Action::OpenFile(id) | Action::Back(Some(id)) => id,
        };

        let node = match self.store.get(target).await {
            Ok(node) => node,
            Err(TreeError::NotFound(_)) => {
                return self
                    .render_root(Some(UNAVAILABLE_NOTICE))
                    .await
                    .map(Outcome::Menu)
            }
            Err(e) => return Err(e),
        };

        match action {
            Action::Back(_) => self.render(node.parent_id).await.map(Outcome::Menu),
            _ if node.kind == NodeKind::File => Ok(Outcome::Deliver(node)),
            _ => self.render_folder(&node).await.map(Outcome::Menu),
        }
    }

    async fn render_root(&self, notice: Option<&str>) -> TreeResult<Menu> {
        let children = self.store.children_of(None).await?;
        Ok(Menu {
            title: ROOT_TITLE.to_string(),
            entries: children.iter().map(entry_for).collect(),
            back: None,
            notice: notice.map(str::to_string),
        })
    }

    async fn render_folder(&self, folder: &Node) -> TreeResult<Menu> {
        let children = self.store.children_of(Some(folder.id)).await?;
        Ok(Menu {
            // El nombre va fuera de cualquier entidad: dentro no se admiten escapes.
            title: format!("📁 {}\nElige una carpeta o un fichero:", escape_markdown(&folder.name)),
            entries: children.iter().map(entry_for).collect(),
            back: Some(Action::Back(Some(folder.id))),
            notice: None,
        })
    }
}
