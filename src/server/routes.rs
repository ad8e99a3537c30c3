//! HTTP routes: routing lookups, cluster inspection and document
//! reads. Document state is served by any instance; only the live
//! editing session is pinned to the owner.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use serde_json::json;

use crate::state::AppState;

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(super::ws::upgrade))
        .route("/api/route/{doc_id}", get(route_doc))
        .route("/api/instances", get(instances))
        .route("/api/ring", get(ring))
        .route("/api/documents/{doc_id}/content", get(content))
        .route("/api/documents/{doc_id}/version", get(version))
        .route("/api/documents/{doc_id}/state", get(doc_state))
        .route("/api/documents/{doc_id}/exists", get(exists))
        .with_state(state)
}

/// Anyhow errors become 500s with a JSON body.
pub struct ApiError(anyhow::Error);

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(error: E) -> Self {
        Self(error.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "instanceId": state.instance.id,
        "sessions": state.sessions.session_count(),
    }))
}

async fn route_doc(
    State(state): State<Arc<AppState>>,
    Path(doc_id): Path<String>,
) -> Response {
    match state.router.route(&doc_id) {
        Some(owner) => Json(json!({
            "docId": doc_id,
            "instanceId": owner.id,
            "address": owner.address(),
            "websocketUrl": format!("ws://{}/ws", owner.address()),
            "local": owner.id == state.instance.id,
        }))
        .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "no live instances" })),
        )
            .into_response(),
    }
}

async fn instances(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "local": state.instance.id,
        "instances": state.membership.instances(),
    }))
}

async fn ring(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "liveInstances": state.router.live_count(),
        "vnodeCounts": state.router.vnode_counts(),
    }))
}

async fn content(
    State(state): State<Arc<AppState>>,
    Path(doc_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let content = state.reconciler.content(&doc_id).await?;
    Ok(Json(json!({ "docId": doc_id, "content": content })))
}

async fn version(
    State(state): State<Arc<AppState>>,
    Path(doc_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let vector = state.reconciler.vector(&doc_id).await?;
    Ok(Json(json!({ "docId": doc_id, "versionVector": vector })))
}

/// Full synchronization state: content, vector, buffered edit count
/// and any capture gaps.
async fn doc_state(
    State(state): State<Arc<AppState>>,
    Path(doc_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let content = state.reconciler.content(&doc_id).await?;
    let vector = state.reconciler.vector(&doc_id).await?;
    let gaps = state.reconciler.detect_gaps(&doc_id).await?;
    Ok(Json(json!({
        "docId": doc_id,
        "content": content,
        "versionVector": vector,
        "pendingEdits": state.buffer.pending_len(&doc_id).await,
        "captureGaps": gaps,
        "subscribers": state.sessions.subscriber_count(&doc_id),
    })))
}

async fn exists(
    State(state): State<Arc<AppState>>,
    Path(doc_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let meta = state.documents.get(&doc_id).await?;
    Ok(Json(json!({
        "docId": doc_id,
        "exists": meta.is_some(),
        "title": meta.map(|meta| meta.title),
    })))
}
