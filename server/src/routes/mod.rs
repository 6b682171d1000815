//! HTTP route definitions.

mod conflicts;
mod events;
mod health;
mod realtime;
mod sync;

use crate::AppState;
use axum::Router;

/// Create all application routes.
pub fn create_routes() -> Router<AppState> {
    Router::new()
        .merge(health::routes())
        .merge(sync::routes())
        .merge(conflicts::routes())
        .merge(events::routes())
        .merge(realtime::routes())
}
