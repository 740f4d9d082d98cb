// Real-time connection status

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use tasklane_sync::ConnectionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/ws/status", get(ws_status))
        .with_state(state)
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WsStatus {
    pub total_connections: usize,
    pub connected_users: usize,
}

/// GET /ws/status - Real-time connection statistics
#[utoipa::path(
    get,
    path = "/ws/status",
    responses((status = 200, description = "Connection statistics", body = WsStatus)),
    tag = "sync"
)]
pub async fn ws_status(State(state): State<AppState>) -> Json<WsStatus> {
    Json(WsStatus {
        total_connections: state.registry.total_connections(),
        connected_users: state.registry.connected_users().len(),
    })
}
