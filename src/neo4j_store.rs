//! Backend Neo4j del Tree Store.
//!
//! Cada nodo es un `(:CatalogNode)`; la relación padre se guarda sólo como
//! `(hijo)-[:CHILD_OF]->(padre)`, de modo que "sin padre" significa
//! "sin relación `CHILD_OF`" y no hay una segunda representación que
//! pueda desincronizarse.
//!
//! Concurrencia: `delete_subtree` bloquea (escribiendo una marca) cada nodo
//! antes de leer sus hijos, y `create` bloquea al padre antes de comprobar
//! su tipo. Un `create` bajo ese nodo o bien ya había confirmado y aparece
//! en la lectura, o bien espera al borrado y no encuentra al padre.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use neo4rs::{query, Graph, Row, RowStream, Txn};
use tracing::{debug, info};
use url::Url;

use crate::{
    config::AppConfig,
    error::{TreeError, TreeResult},
    models::{FileRef, NewNode, Node, NodeId, NodeKind},
    store::{validate_new_node, TreeStore},
};

const NODE_COLUMNS: &str = "n.id AS id, n.name AS name, n.kind AS kind, n.file_ref AS file_ref, \
                            n.created_at AS created_at, p.id AS parent_id";

pub async fn connect_from_config(cfg: &AppConfig) -> Result<Graph> {
    let url = Url::parse(&cfg.neo4j_uri)?;
    let host = url.host_str().unwrap_or("localhost");
    let port = url.port().unwrap_or(7687);
    let addr = format!("{host}:{port}");

    info!("Conectando a Neo4j en {addr}...");
    let graph = Graph::new(&addr, &cfg.neo4j_user, &cfg.neo4j_password).await?;
    info!("Conexión a Neo4j OK");
    Ok(graph)
}

/// Crea el constraint de unicidad sobre `:CatalogNode(id)`.
pub async fn ensure_schema(graph: &Graph) -> Result<()> {
    graph
        .run(query(
            "CREATE CONSTRAINT catalog_node_id IF NOT EXISTS
             FOR (n:CatalogNode)
             REQUIRE n.id IS UNIQUE",
        ))
        .await?;

    info!("Esquema de Neo4j asegurado (constraint de :CatalogNode creado).");
    Ok(())
}

#[derive(Clone)]
pub struct Neo4jTreeStore {
    graph: Arc<Graph>,
}

impl Neo4jTreeStore {
    pub fn new(graph: Arc<Graph>) -> Self {
        Self { graph }
    }

    /// Bloquea al padre hasta el commit y devuelve su tipo. Con el bloqueo
    /// tomado, un `delete_subtree` concurrente no puede borrarlo antes de
    /// que se cree la relación `CHILD_OF`.
    async fn lock_parent(tx: &Txn, parent_id: NodeId) -> TreeResult<Option<String>> {
        let mut rows = tx
            .execute(
                query(
                    "MATCH (p:CatalogNode {id: $id})
                     SET p.locked = true
                     REMOVE p.locked
                     RETURN p.kind AS kind",
                )
                .param("id", parent_id.to_string()),
            )
            .await?;
        let mut kind = None;
        while let Some(row) = rows.next().await? {
            kind = row.get::<String>("kind");
        }
        Ok(kind)
    }

    /// Si el padre ya no existe, el fallo se debe a un borrado concurrente.
    async fn classify_parent_error(&self, parent_id: NodeId, err: TreeError) -> TreeError {
        match self.get(parent_id).await {
            Err(TreeError::NotFound(_)) => TreeError::DanglingParent(parent_id.to_string()),
            _ => err,
        }
    }

    /// Marca (y por tanto bloquea hasta el commit) los nodos de `ids` y
    /// devuelve los ids de sus hijos directos, también marcados.
    async fn lock_children(tx: &Txn, ids: &[String]) -> TreeResult<Vec<String>> {
        let mut rows = tx
            .execute(
                query(
                    "MATCH (c:CatalogNode)-[:CHILD_OF]->(p:CatalogNode)
                     WHERE p.id IN $ids
                     SET c.deleting = true
                     RETURN c.id AS id",
                )
                .param("ids", ids.to_vec()),
            )
            .await?;

        let mut children = Vec::new();
        while let Some(row) = rows.next().await? {
            if let Some(id) = row.get::<String>("id") {
                children.push(id);
            }
        }
        Ok(children)
    }

    async fn collect_rows(&self, q: neo4rs::Query) -> TreeResult<Vec<Node>> {
        let mut rows = self.graph.execute(q).await?;
        let mut nodes = Vec::new();
        while let Some(row) = rows.next().await? {
            nodes.push(node_from_row(&row)?);
        }
        Ok(nodes)
    }
}

/// Consume el stream completo antes de la siguiente sentencia de la transacción.
async fn count_rows(mut rows: RowStream) -> TreeResult<usize> {
    let mut count = 0;
    while rows.next().await?.is_some() {
        count += 1;
    }
    Ok(count)
}

fn node_from_row(row: &Row) -> TreeResult<Node> {
    node_from_fields(|name| row.get::<String>(name))
}

/// Construye un `Node` a partir de las columnas de `NODE_COLUMNS`. Las
/// columnas nulas (`parent_id`, `file_ref`) llegan como `None`.
fn node_from_fields(column: impl Fn(&str) -> Option<String>) -> TreeResult<Node> {
    let field = |name: &str| {
        column(name).ok_or_else(|| TreeError::unavailable(format!("falta el campo '{name}' en Neo4j")))
    };

    let id = field("id")?
        .parse()
        .map_err(|e| TreeError::unavailable(format!("id corrupto en Neo4j: {e}")))?;
    let kind = NodeKind::parse(&field("kind")?)
        .ok_or_else(|| TreeError::unavailable("tipo de nodo desconocido en Neo4j"))?;
    let created_at = DateTime::parse_from_rfc3339(&field("created_at")?)
        .map_err(|e| TreeError::unavailable(format!("fecha corrupta en Neo4j: {e}")))?
        .with_timezone(&Utc);
    let parent_id = column("parent_id")
        .map(|raw| raw.parse::<NodeId>())
        .transpose()
        .map_err(|e| TreeError::unavailable(format!("parent_id corrupto en Neo4j: {e}")))?;

    Ok(Node {
        id,
        name: field("name")?,
        kind,
        file_ref: column("file_ref").map(FileRef::new),
        parent_id,
        created_at,
    })
}

#[async_trait]
impl TreeStore for Neo4jTreeStore {
    async fn create(&self, new_node: NewNode) -> TreeResult<NodeId> {
        validate_new_node(&new_node)?;

        let id = NodeId::new();
        // Nanosegundos con formato fijo: el orden lexicográfico es el de creación.
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
        let props = if new_node.file_ref.is_some() {
            "{id: $id, name: $name, kind: $kind, file_ref: $file_ref, created_at: $created_at}"
        } else {
            "{id: $id, name: $name, kind: $kind, created_at: $created_at}"
        };

        let tx = self.graph.start_txn().await?;

        let cypher = match new_node.parent_id {
            Some(parent_id) => {
                let kind = match Self::lock_parent(&tx, parent_id).await {
                    Ok(kind) => kind,
                    Err(e) => {
                        // La transacción puede haber sido abortada ya por el servidor.
                        let _ = tx.rollback().await;
                        return Err(self.classify_parent_error(parent_id, e).await);
                    }
                };
                match kind.as_deref() {
                    Some("folder") => {}
                    Some(_) => {
                        tx.rollback().await?;
                        return Err(TreeError::DanglingParent(format!(
                            "{parent_id} es un fichero, no una carpeta"
                        )));
                    }
                    None => {
                        tx.rollback().await?;
                        return Err(TreeError::DanglingParent(parent_id.to_string()));
                    }
                }
                format!(
                    "MATCH (p:CatalogNode {{id: $parent_id}})
                     CREATE (n:CatalogNode {props})-[:CHILD_OF]->(p)
                     RETURN n.id AS id"
                )
            }
            None => format!("CREATE (n:CatalogNode {props}) RETURN n.id AS id"),
        };

        let mut q = query(&cypher)
            .param("id", id.to_string())
            .param("name", new_node.name.trim().to_string())
            .param("kind", new_node.kind.as_str())
            .param("created_at", created_at);
        if let Some(file_ref) = &new_node.file_ref {
            q = q.param("file_ref", file_ref.as_str());
        }
        if let Some(parent_id) = new_node.parent_id {
            q = q.param("parent_id", parent_id.to_string());
        }

        let created = count_rows(tx.execute(q).await?).await?;

        if created == 0 {
            tx.rollback().await?;
            let parent = new_node.parent_id.map(|p| p.to_string()).unwrap_or_default();
            return Err(TreeError::DanglingParent(parent));
        }

        tx.commit().await?;
        debug!("Nodo {id} creado en Neo4j.");
        Ok(id)
    }

    async fn children_of(&self, parent_id: Option<NodeId>) -> TreeResult<Vec<Node>> {
        let q = match parent_id {
            Some(parent_id) => query(&format!(
                "MATCH (n:CatalogNode)-[:CHILD_OF]->(p:CatalogNode {{id: $parent_id}})
                 RETURN {NODE_COLUMNS}
                 ORDER BY n.created_at, n.id"
            ))
            .param("parent_id", parent_id.to_string()),
            None => query(&format!(
                "MATCH (n:CatalogNode)
                 WHERE NOT (n)-[:CHILD_OF]->()
                 OPTIONAL MATCH (n)-[:CHILD_OF]->(p:CatalogNode)
                 RETURN {NODE_COLUMNS}
                 ORDER BY n.created_at, n.id"
            )),
        };
        self.collect_rows(q).await
    }

    async fn get(&self, id: NodeId) -> TreeResult<Node> {
        let q = query(&format!(
            "MATCH (n:CatalogNode {{id: $id}})
             OPTIONAL MATCH (n)-[:CHILD_OF]->(p:CatalogNode)
             RETURN {NODE_COLUMNS}"
        ))
        .param("id", id.to_string());

        self.collect_rows(q)
            .await?
            .into_iter()
            .next()
            .ok_or(TreeError::NotFound(id))
    }

    async fn delete_subtree(&self, id: NodeId) -> TreeResult<usize> {
        let tx = self.graph.start_txn().await?;

        let locked = tx
            .execute(
                query("MATCH (n:CatalogNode {id: $id}) SET n.deleting = true RETURN n.id AS id")
                    .param("id", id.to_string()),
            )
            .await?;

        if count_rows(locked).await? == 0 {
            tx.rollback().await?;
            return Ok(0);
        }

        // Frontera explícita por niveles; cada nivel se bloquea antes de
        // descubrir el siguiente.
        let mut levels = vec![vec![id.to_string()]];
        loop {
            let Some(frontier) = levels.last() else { break };
            let next = Self::lock_children(&tx, frontier).await?;
            if next.is_empty() {
                break;
            }
            levels.push(next);
        }

        // Post-orden: el nivel más profundo primero.
        let mut removed = 0usize;
        for level in levels.iter().rev() {
            let mut rows = tx
                .execute(
                    query(
                        "MATCH (n:CatalogNode) WHERE n.id IN $ids
                         DETACH DELETE n
                         RETURN count(*) AS removed",
                    )
                    .param("ids", level.clone()),
                )
                .await?;
            while let Some(row) = rows.next().await? {
                removed += row.get::<i64>("removed").unwrap_or(0) as usize;
            }
        }

        tx.commit().await?;
        info!("Subárbol {id} borrado en Neo4j ({removed} nodos).");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn columns(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn map_row(row: &HashMap<String, String>) -> TreeResult<Node> {
        node_from_fields(|name| row.get(name).cloned())
    }

    #[test]
    fn root_folder_maps_missing_columns_to_none() {
        let id = NodeId::new();
        let row = columns(&[
            ("id", id.to_string().as_str()),
            ("name", "Math"),
            ("kind", "folder"),
            ("created_at", "2024-03-01T10:00:00.000000001Z"),
        ]);
        let node = map_row(&row).unwrap();
        assert_eq!(node.id, id);
        assert_eq!(node.kind, NodeKind::Folder);
        assert_eq!(node.parent_id, None);
        assert_eq!(node.file_ref, None);
    }

    #[test]
    fn nested_file_keeps_reference_and_parent() {
        let (id, parent) = (NodeId::new(), NodeId::new());
        let row = columns(&[
            ("id", id.to_string().as_str()),
            ("name", "Notes.pdf"),
            ("kind", "file"),
            ("file_ref", "R1"),
            ("parent_id", parent.to_string().as_str()),
            ("created_at", "2024-03-01T10:00:00Z"),
        ]);
        let node = map_row(&row).unwrap();
        assert_eq!(node.file_ref, Some(FileRef::new("R1")));
        assert_eq!(node.parent_id, Some(parent));
    }

    #[test]
    fn corrupt_rows_surface_as_unavailable() {
        let good = columns(&[
            ("id", NodeId::new().to_string().as_str()),
            ("name", "Math"),
            ("kind", "folder"),
            ("created_at", "2024-03-01T10:00:00Z"),
        ]);
        for (column, value) in [
            ("id", "no-es-un-uuid"),
            ("kind", "carpeta"),
            ("created_at", "ayer"),
            ("parent_id", "root"),
        ] {
            let mut row = good.clone();
            row.insert(column.to_string(), value.to_string());
            assert!(matches!(map_row(&row), Err(TreeError::Unavailable(_))), "{column}");
        }

        let mut missing = good;
        missing.remove("name");
        assert!(matches!(map_row(&missing), Err(TreeError::Unavailable(_))));
    }
}
