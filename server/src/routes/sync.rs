//! Sync endpoint routes.

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use calsync_engine::StatusBoard;

use crate::auth::AuthUser;
use crate::error::Result;
use crate::handlers::{handle_sync, CancelResponse};
use crate::sync::{SyncMode, SyncReport};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sync/status", get(status_handler))
        .route("/sync/full", post(full_handler))
        .route("/sync/incremental", post(incremental_handler))
        .route("/sync/cancel", post(cancel_handler))
}

/// GET /sync/status - Current status board.
async fn status_handler(State(state): State<AppState>, _auth: AuthUser) -> Json<StatusBoard> {
    Json(state.orchestrator.status())
}

/// POST /sync/full - Run a full pass.
async fn full_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
) -> Result<Json<SyncReport>> {
    let report = handle_sync(&state.orchestrator, SyncMode::Full).await?;
    Ok(Json(report))
}

/// POST /sync/incremental - Run an incremental pass.
async fn incremental_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
) -> Result<Json<SyncReport>> {
    let report = handle_sync(&state.orchestrator, SyncMode::Incremental).await?;
    Ok(Json(report))
}

/// POST /sync/cancel - Stop the running pass before it applies changes.
async fn cancel_handler(State(state): State<AppState>, _auth: AuthUser) -> Json<CancelResponse> {
    Json(CancelResponse {
        cancelled: state.orchestrator.cancel(),
    })
}
