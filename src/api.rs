use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Json, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use crate::{
    app_state::AppState,
    error::TreeError,
    models::{FileRef, NewNode, Node, NodeId, NodeKind},
};

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListNodesQuery {
    pass: Option<String>,
    parent_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateNodePayload {
    pass: Option<String>,
    name: String,
    #[serde(rename = "type")]
    kind: NodeKind,
    file_id: Option<String>,
    parent_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeleteNodePayload {
    pass: Option<String>,
    id: String,
}

#[derive(Serialize)]
pub struct CreateNodeResponse {
    status: &'static str,
    id: NodeId,
}

#[derive(Serialize)]
pub struct DeleteNodeResponse {
    status: &'static str,
    removed: usize,
}

/// Vista de un nodo en la API (`file_ref` sólo en ficheros).
#[derive(Serialize)]
pub struct NodeView {
    id: NodeId,
    name: String,
    kind: NodeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_ref: Option<FileRef>,
    parent_id: Option<NodeId>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl From<Node> for NodeView {
    fn from(node: Node) -> Self {
        Self {
            id: node.id,
            name: node.name,
            kind: node.kind,
            file_ref: node.file_ref,
            parent_id: node.parent_id,
            created_at: node.created_at,
        }
    }
}

// --- Errores ---

pub struct ApiError(TreeError);

impl From<TreeError> for ApiError {
    fn from(err: TreeError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(TreeError::invalid(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(TreeError::invalid(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            TreeError::InvalidNode(_) => StatusCode::BAD_REQUEST,
            TreeError::DanglingParent(_) => StatusCode::CONFLICT,
            TreeError::NotFound(_) => StatusCode::NOT_FOUND,
            TreeError::AuthFailure => StatusCode::UNAUTHORIZED,
            TreeError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        let message = match &self.0 {
            TreeError::AuthFailure => "Auth Failed".to_string(),
            other => other.to_string(),
        };
        if status == StatusCode::SERVICE_UNAVAILABLE {
            error!("Error del store en la API: {}", self.0);
        }
        (status, Json(json!({ "error": message, "kind": self.0.kind() }))).into_response()
    }
}

/// `None`, `""`, `"root"` y `"null"` significan raíz; cualquier otro valor
/// debe ser un id.
fn parse_parent(raw: Option<&str>) -> Result<Option<NodeId>, String> {
    match raw.map(str::trim) {
        None | Some("") | Some("root") | Some("null") => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|_| raw.to_string()),
    }
}

fn check_pass(state: &AppState, pass: Option<&str>) -> Result<(), ApiError> {
    state.secret.verify(pass).map_err(|e| {
        warn!("Intento de acceso al panel con un secreto incorrecto.");
        ApiError(e)
    })
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(health_handler))
        .route("/api/get_nodes", get(list_nodes_handler))
        .route("/api/create_node", post(create_node_handler))
        .route("/api/delete_node", post(delete_node_handler))
        .with_state(app_state)
}

// --- Handlers ---

async fn health_handler() -> &'static str {
    "Study Bot online 🟢 (panel en /admin/)"
}

#[axum::debug_handler]
async fn list_nodes_handler(
    State(state): State<AppState>,
    query: Result<Query<ListNodesQuery>, QueryRejection>,
) -> Result<Json<Vec<NodeView>>, ApiError> {
    let Query(query) = query?;
    check_pass(&state, query.pass.as_deref())?;

    // Un id que no parsea no puede tener hijos.
    let Ok(parent_id) = parse_parent(query.parent_id.as_deref()) else {
        return Ok(Json(Vec::new()));
    };
    let nodes = state.store.children_of(parent_id).await?;
    Ok(Json(nodes.into_iter().map(NodeView::from).collect()))
}

#[axum::debug_handler]
async fn create_node_handler(
    State(state): State<AppState>,
    payload: Result<Json<CreateNodePayload>, JsonRejection>,
) -> Result<Json<CreateNodeResponse>, ApiError> {
    let Json(payload) = payload?;
    check_pass(&state, payload.pass.as_deref())?;

    let parent_id = parse_parent(payload.parent_id.as_deref()).map_err(TreeError::DanglingParent)?;
    let file_ref = payload
        .file_id
        .filter(|raw| !raw.trim().is_empty())
        .map(|raw| FileRef::new(raw.trim()));

    let new_node = NewNode {
        name: payload.name,
        kind: payload.kind,
        file_ref,
        parent_id,
    };
    let id = state.store.create(new_node).await?;
    info!("Nodo {id} creado desde el panel.");

    Ok(Json(CreateNodeResponse { status: "success", id }))
}

#[axum::debug_handler]
async fn delete_node_handler(
    State(state): State<AppState>,
    payload: Result<Json<DeleteNodePayload>, JsonRejection>,
) -> Result<Json<DeleteNodeResponse>, ApiError> {
    let Json(payload) = payload?;
    check_pass(&state, payload.pass.as_deref())?;

    // Un id que no parsea ya está "borrado".
    let removed = match payload.id.trim().parse::<NodeId>() {
        Ok(id) => state.store.delete_subtree(id).await?,
        Err(_) => 0,
    };
    info!("Borrado solicitado para {}: {removed} nodos eliminados.", payload.id);

    Ok(Json(DeleteNodeResponse { status: "deleted", removed }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, StoreBackend};
    use crate::store::{MemoryTreeStore, TreeStore};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_config() -> AppConfig {
        AppConfig {
            server_addr: "127.0.0.1:0".into(),
            frontend_dir: "frontend".into(),
            admin_pass: "admin123".into(),
            admin_id: None,
            telegram_token: None,
            telegram_api_url: "http://localhost".into(),
            store_backend: StoreBackend::Memory,
            neo4j_uri: String::new(),
            neo4j_user: String::new(),
            neo4j_password: String::new(),
        }
    }

    fn app() -> (Router, Arc<MemoryTreeStore>) {
        let store = Arc::new(MemoryTreeStore::new());
        let state = AppState::new(test_config(), store.clone());
        (create_router(state), store)
    }

    async fn call(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_uri(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn create_list_delete_round() {
        let (router, _) = app();

        let (status, body) = call(
            &router,
            post_json("/api/create_node", json!({ "pass": "admin123", "name": "Math", "type": "folder", "parent_id": "root" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        let math = body["id"].as_str().unwrap().to_string();

        let (status, _) = call(
            &router,
            post_json(
                "/api/create_node",
                json!({ "pass": "admin123", "name": "Notes.pdf", "type": "file", "file_id": "R1", "parent_id": math }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, roots) = call(&router, get_uri("/api/get_nodes?pass=admin123")).await;
        assert_eq!(roots.as_array().unwrap().len(), 1);
        assert_eq!(roots[0]["kind"], "folder");
        assert_eq!(roots[0]["parent_id"], Value::Null);
        assert!(roots[0].get("file_ref").is_none());

        let (_, inside) = call(&router, get_uri(&format!("/api/get_nodes?pass=admin123&parent_id={math}"))).await;
        assert_eq!(inside[0]["file_ref"], "R1");
        assert_eq!(inside[0]["parent_id"], math.as_str());

        let (status, body) = call(&router, post_json("/api/delete_node", json!({ "pass": "admin123", "id": math }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "deleted", "removed": 2 }));

        let (_, roots) = call(&router, get_uri("/api/get_nodes?pass=admin123&parent_id=root")).await;
        assert_eq!(roots, json!([]));
    }

    #[tokio::test]
    async fn delete_is_unconditional() {
        let (router, _) = app();
        for id in [NodeId::new().to_string(), "not-an-id".to_string()] {
            let (status, body) = call(&router, post_json("/api/delete_node", json!({ "pass": "admin123", "id": id }))).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["status"], "deleted");
            assert_eq!(body["removed"], 0);
        }
    }

    #[tokio::test]
    async fn every_wrong_secret_gets_the_same_answer() {
        let (router, store) = app();
        let requests = vec![
            get_uri("/api/get_nodes?pass=nope"),
            get_uri("/api/get_nodes"),
            post_json("/api/create_node", json!({ "pass": "x", "name": "A", "type": "folder" })),
            post_json("/api/create_node", json!({ "name": "A", "type": "folder" })),
            post_json("/api/delete_node", json!({ "pass": "", "id": NodeId::new() })),
        ];
        for request in requests {
            let (status, body) = call(&router, request).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(body, json!({ "error": "Auth Failed", "kind": "AUTH_FAILURE" }));
        }
        assert!(store.children_of(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_bodies_are_invalid_nodes() {
        let (router, store) = app();
        let bodies = [
            json!({ "pass": "admin123", "name": "A", "type": "folder", "extra": 1 }),
            json!({ "pass": "admin123", "type": "folder" }),
            json!({ "pass": "admin123", "name": "A", "type": "symlink" }),
            json!({ "pass": "admin123", "name": "A", "type": "file" }),
            json!({ "pass": "admin123", "name": "A", "type": "file", "file_id": "  " }),
            json!({ "pass": "admin123", "name": "", "type": "folder" }),
        ];
        for body in bodies {
            let (status, response) = call(&router, post_json("/api/create_node", body.clone())).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
            assert_eq!(response["kind"], "INVALID_NODE");
        }
        assert!(store.children_of(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_or_missing_parents_are_rejected() {
        let (router, store) = app();
        let file = store
            .create(NewNode::file("a.pdf", FileRef::new("R"), None))
            .await
            .unwrap();
        for parent in [file.to_string(), NodeId::new().to_string(), "garbage".to_string()] {
            let (status, body) = call(
                &router,
                post_json("/api/create_node", json!({ "pass": "admin123", "name": "B", "type": "folder", "parent_id": parent })),
            )
            .await;
            assert_eq!(status, StatusCode::CONFLICT);
            assert_eq!(body["kind"], "DANGLING_PARENT");
        }
    }

    #[tokio::test]
    async fn folders_ignore_an_empty_file_id() {
        let (router, store) = app();
        let (status, _) = call(
            &router,
            post_json("/api/create_node", json!({ "pass": "admin123", "name": "A", "type": "folder", "file_id": "" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(store.children_of(None).await.unwrap()[0].file_ref, None);
    }
}
