//! Tree Store: dueño de todos los nodos del catálogo.
//!
//! API pública:
//!   - `TreeStore` (trait asíncrono compartido por los backends).
//!   - `MemoryTreeStore`, backend en memoria (tests y `STORE_BACKEND=memory`).
//!   - `validate_new_node`, validación común antes de cualquier escritura.
//!
//! El backend Neo4j vive en `neo4j_store`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::{
    error::{TreeError, TreeResult},
    models::{NewNode, Node, NodeId, NodeKind},
};

#[async_trait]
pub trait TreeStore: Send + Sync + 'static {
    /// Crea un nodo y devuelve su id recién acuñado.
    async fn create(&self, new_node: NewNode) -> TreeResult<NodeId>;

    /// Hijos inmediatos en orden de creación (raíces si `parent_id` es `None`).
    /// Una carpeta inexistente produce una lista vacía, no un error.
    async fn children_of(&self, parent_id: Option<NodeId>) -> TreeResult<Vec<Node>>;

    async fn get(&self, id: NodeId) -> TreeResult<Node>;

    /// Borra el nodo y todos sus descendientes, hijos antes que padres.
    /// Devuelve 0 si el nodo ya no existía.
    async fn delete_subtree(&self, id: NodeId) -> TreeResult<usize>;
}

/// Reglas de forma de un `NewNode`. La existencia del padre la comprueba
/// cada backend dentro de su propia sección crítica.
pub fn validate_new_node(new_node: &NewNode) -> TreeResult<()> {
    if new_node.name.trim().is_empty() {
        return Err(TreeError::invalid("el nombre no puede estar vacío"));
    }
    match (new_node.kind, &new_node.file_ref) {
        (NodeKind::File, None) => Err(TreeError::invalid("un fichero necesita file_ref")),
        (NodeKind::File, Some(file_ref)) if file_ref.as_str().trim().is_empty() => {
            Err(TreeError::invalid("un fichero necesita file_ref"))
        }
        (NodeKind::Folder, Some(_)) => Err(TreeError::invalid("una carpeta no lleva file_ref")),
        _ => Ok(()),
    }
}

#[derive(Default)]
struct Inner {
    nodes: HashMap<NodeId, Node>,
    /// Índice padre -> hijos en orden de creación. La clave `None` son las raíces.
    children: HashMap<Option<NodeId>, Vec<NodeId>>,
}

impl Inner {
    /// Recorrido en anchura con frontera explícita: el orden devuelto pone
    /// siempre a cada padre antes que a sus hijos.
    fn collect_subtree(&self, root: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        let mut frontier = VecDeque::from([root]);

        while let Some(current) = frontier.pop_front() {
            if !self.nodes.contains_key(&current) || !seen.insert(current) {
                continue;
            }
            order.push(current);
            if let Some(kids) = self.children.get(&Some(current)) {
                frontier.extend(kids.iter().copied());
            }
        }
        order
    }

    fn remove_one(&mut self, id: NodeId) -> bool {
        let Some(node) = self.nodes.remove(&id) else {
            return false;
        };
        if let Some(siblings) = self.children.get_mut(&node.parent_id) {
            siblings.retain(|sibling| *sibling != id);
            if siblings.is_empty() {
                self.children.remove(&node.parent_id);
            }
        }
        self.children.remove(&Some(id));
        true
    }
}

/// Backend en memoria. Un único `RwLock` serializa las escrituras, así que
/// un borrado recursivo observa una instantánea consistente del árbol.
#[derive(Default)]
pub struct MemoryTreeStore {
    inner: RwLock<Inner>,
}

impl MemoryTreeStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> TreeResult<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| TreeError::unavailable("lock del store envenenado"))
    }

    fn write(&self) -> TreeResult<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| TreeError::unavailable("lock del store envenenado"))
    }
}

#[async_trait]
impl TreeStore for MemoryTreeStore {
    async fn create(&self, new_node: NewNode) -> TreeResult<NodeId> {
        validate_new_node(&new_node)?;
        let mut inner = self.write()?;

        if let Some(parent_id) = new_node.parent_id {
            match inner.nodes.get(&parent_id) {
                Some(parent) if parent.is_folder() => {}
                Some(_) => {
                    return Err(TreeError::DanglingParent(format!(
                        "{parent_id} es un fichero, no una carpeta"
                    )))
                }
                None => return Err(TreeError::DanglingParent(parent_id.to_string())),
            }
        }

        let id = NodeId::new();
        let node = Node {
            id,
            name: new_node.name.trim().to_string(),
            kind: new_node.kind,
            file_ref: new_node.file_ref,
            parent_id: new_node.parent_id,
            created_at: Utc::now(),
        };
        inner.children.entry(node.parent_id).or_default().push(id);
        inner.nodes.insert(id, node);
        Ok(id)
    }

    async fn children_of(&self, parent_id: Option<NodeId>) -> TreeResult<Vec<Node>> {
        let inner = self.read()?;
        let children = inner
            .children
            .get(&parent_id)
            .map(|ids| ids.iter().filter_map(|id| inner.nodes.get(id).cloned()).collect())
            .unwrap_or_default();
        Ok(children)
    }

    async fn get(&self, id: NodeId) -> TreeResult<Node> {
        self.read()?
            .nodes
            .get(&id)
            .cloned()
            .ok_or(TreeError::NotFound(id))
    }

    async fn delete_subtree(&self, id: NodeId) -> TreeResult<usize> {
        let mut inner = self.write()?;
        let order = inner.collect_subtree(id);
        let mut removed = 0;
        for node_id in order.into_iter().rev() {
            if inner.remove_one(node_id) {
                removed += 1;
            }
        }
        debug!("Subárbol {id} borrado en memoria ({removed} nodos).");
        Ok(removed)
    }
}
