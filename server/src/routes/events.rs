//! Local event routes.
//!
//! Edits land in the event store immediately and reach the provider on the
//! next pass.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use calsync_engine::{CalendarEvent, EventFields, EventId};

use crate::auth::AuthUser;
use crate::error::{AppError, Result};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/events", get(list_handler).post(create_handler))
        .route(
            "/events/{id}",
            get(get_handler).put(upsert_handler).delete(delete_handler),
        )
}

/// GET /events - Active events.
async fn list_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
) -> Result<Json<Vec<CalendarEvent>>> {
    Ok(Json(state.orchestrator.events().await?))
}

/// POST /events - Create an event under a generated id.
async fn create_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Json(fields): Json<EventFields>,
) -> Result<(StatusCode, Json<CalendarEvent>)> {
    let event = state.orchestrator.upsert_event(None, fields).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

/// GET /events/{id}
async fn get_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<EventId>,
) -> Result<Json<CalendarEvent>> {
    state
        .orchestrator
        .event(&id)
        .await?
        .filter(CalendarEvent::is_active)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("event {}", id)))
}

/// PUT /events/{id} - Create or edit an event.
async fn upsert_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<EventId>,
    Json(fields): Json<EventFields>,
) -> Result<Json<CalendarEvent>> {
    Ok(Json(state.orchestrator.upsert_event(Some(id), fields).await?))
}

/// DELETE /events/{id}
async fn delete_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<EventId>,
) -> Result<StatusCode> {
    state.orchestrator.delete_event(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
