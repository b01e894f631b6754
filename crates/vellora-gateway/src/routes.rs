use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use futures::StreamExt;
use tracing::{info, warn};

use vellora_agent::RunRequest;

use crate::state::AppState;

// GET /api/health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": if state.session.is_ready() { "ok" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// POST /api/chat: streams `data: {...}\n\n` frames until done or error
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RunRequest>,
) -> Result<Response, StatusCode> {
    if req.user_id.trim().is_empty() || req.query.trim().is_empty() {
        warn!("Chat request without user or query");
        return Err(StatusCode::BAD_REQUEST);
    }
    info!(user_id = %req.user_id, role = ?req.role, "Chat request");

    let frames = state.session.frames(req).map(Ok::<_, Infallible>);
    Response::builder()
        .header(CONTENT_TYPE, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache")
        .header("X-Accel-Buffering", "no")
        .body(Body::from_stream(frames))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
