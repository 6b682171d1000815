//! Calsync Server - bidirectional calendar sync.
//!
//! The server keeps a local event store in step with a calendar provider.
//! Passes, conflict resolution and local edits go through the
//! [`SyncOrchestrator`](sync::SyncOrchestrator); HTTP and WebSocket endpoints
//! expose it to clients and stream status changes as they happen.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod remote;
pub mod routes;
pub mod sync;
pub mod websocket;

use std::sync::Arc;

use axum::Router;
use calsync_engine::Timestamp;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::sync::{NotificationSender, SyncOrchestrator};
use crate::websocket::ConnectionManager;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SyncOrchestrator>,
    pub config: Arc<Config>,
    pub conn_manager: Arc<ConnectionManager>,
    /// Feeds the real-time worker
    pub notifications: NotificationSender,
}

/// Build the application router with tracing and CORS.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
        .with_state(state)
}

/// Current wall-clock time in milliseconds since the epoch.
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as Timestamp
}
