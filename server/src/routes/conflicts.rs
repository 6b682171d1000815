//! Conflict routes.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use calsync_engine::{EventId, SyncConflict};

use crate::auth::AuthUser;
use crate::error::Result;
use crate::handlers::{handle_resolve, ResolveRequest};
use crate::sync::ResolutionReport;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/conflicts", get(list_handler))
        .route("/conflicts/{local_id}/resolve", post(resolve_handler))
}

/// GET /conflicts - Conflicts waiting for a decision.
async fn list_handler(State(state): State<AppState>, _auth: AuthUser) -> Json<Vec<SyncConflict>> {
    Json(state.orchestrator.pending_conflicts())
}

/// POST /conflicts/{local_id}/resolve
async fn resolve_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(local_id): Path<EventId>,
    Json(request): Json<ResolveRequest>,
) -> Result<Json<ResolutionReport>> {
    let report = handle_resolve(&state.orchestrator, &local_id, request).await?;
    Ok(Json(report))
}
