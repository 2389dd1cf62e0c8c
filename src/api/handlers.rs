use axum::{
    extract::State,
    response::Json,
    routing::get,
    Router,
};
use serde_json::json;

use crate::relay::{RelayHandle, RelaySnapshot};

#[derive(Clone)]
pub struct ApiState {
    pub relay: RelayHandle,
}

// GET /health - Upstream readiness and subscribed symbols
pub async fn health_check(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let snapshot = state.relay.snapshot();
    Json(json!({
        "ok": true,
        "upstreamReady": snapshot.upstream_ready,
        "subscribed": snapshot.subscribed,
        "viewers": snapshot.viewers,
        "timestamp": chrono::Utc::now()
    }))
}

// GET /api/stats - Viewer counts per symbol
pub async fn relay_stats(State(state): State<ApiState>) -> Json<RelaySnapshot> {
    Json(state.relay.snapshot())
}

// Create the API router
pub fn create_api_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(relay_stats))
        .with_state(state.clone());

    Router::new()
        .route("/health", get(health_check))
        .with_state(state)
        .nest("/api", api_routes)
}
