//! Liveness endpoints.

use axum::{extract::State, routing::get, Json, Router};
use calsync_engine::SyncStatus;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// State of the current sync session
    pub sync: SyncStatus,
    pub realtime_enabled: bool,
    pub connections: usize,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/", get(|| async { "Calsync Server" }))
}

/// GET /health - Unauthenticated; reports the session state alongside liveness.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let board = state.orchestrator.status();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        sync: board.status,
        realtime_enabled: board.realtime_enabled,
        connections: state.conn_manager.connection_count(),
    })
}
