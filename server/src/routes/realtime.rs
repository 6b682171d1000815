//! Real-time routes: provider notifications, the toggle and the WebSocket.

use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::Response,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::error::{AppError, Result};
use crate::handlers::handle_websocket_connection;
use crate::sync::RemoteNotification;
use crate::AppState;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeToggle {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    pub client_id: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/realtime", put(toggle_handler))
        .route("/notifications", post(notification_handler))
        .route("/ws", get(ws_handler))
}

/// PUT /realtime - Enable or disable notification-driven passes.
async fn toggle_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Json(toggle): Json<RealtimeToggle>,
) -> Json<RealtimeToggle> {
    state.orchestrator.set_realtime_enabled(toggle.enabled);
    Json(RealtimeToggle {
        enabled: state.orchestrator.realtime_enabled(),
    })
}

/// POST /notifications - Provider push webhook. Queued for the worker.
async fn notification_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Json(notification): Json<RemoteNotification>,
) -> Result<StatusCode> {
    state
        .notifications
        .send(notification)
        .await
        .map_err(|_| AppError::Internal("real-time worker stopped".to_string()))?;
    Ok(StatusCode::ACCEPTED)
}

/// GET /ws - Upgrade to the WebSocket channel.
async fn ws_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let client_id = query
        .client_id
        .unwrap_or_else(|| "anonymous".to_string());
    ws.on_upgrade(move |socket| {
        handle_websocket_connection(socket, state.orchestrator, state.conn_manager, client_id)
    })
}
