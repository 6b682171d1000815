//! WebSocket handler for real-time sync.
//!
//! Handles WebSocket connections, runs the passes and resolutions clients
//! ask for and relays status changes through the connection manager.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::sync::SyncOrchestrator;
use crate::websocket::{ClientMessage, ConnectionManager, ServerMessage};

use super::{handle_resolve, handle_sync, ResolveRequest};

/// Handle an established WebSocket connection.
///
/// The connection is registered with the manager, receives the current
/// status right away and is served until the client disconnects.
pub async fn handle_websocket_connection(
    socket: WebSocket,
    orchestrator: Arc<SyncOrchestrator>,
    conn_manager: Arc<ConnectionManager>,
    client_id: String,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let conn_id = conn_manager.register(client_id.clone(), tx);

    tracing::info!(
        conn_id = %conn_id,
        client_id = %client_id,
        "WebSocket client connected"
    );

    conn_manager.send_to(&conn_id, ServerMessage::status(orchestrator.status()));

    // Forward messages from the channel to the socket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        tracing::warn!("Failed to send WebSocket message: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize WebSocket message: {}", e);
                }
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let response = process_message(&text, &orchestrator).await;
                conn_manager.send_to(&conn_id, response);
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!("Binary messages not supported");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                tracing::info!(conn_id = %conn_id, "WebSocket close frame received");
                break;
            }
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    conn_manager.unregister(&conn_id);
    send_task.abort();

    tracing::info!(
        conn_id = %conn_id,
        client_id = %client_id,
        active_connections = conn_manager.connection_count(),
        "WebSocket client disconnected"
    );
}

/// Process a client message and return the response.
pub async fn process_message(text: &str, orchestrator: &SyncOrchestrator) -> ServerMessage {
    let client_msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            return ServerMessage::error(format!("Invalid message format: {}", e), None);
        }
    };

    match client_msg {
        ClientMessage::Sync { mode, request_id } => match handle_sync(orchestrator, mode).await {
            Ok(report) => ServerMessage::SyncResult { report, request_id },
            Err(e) => ServerMessage::error(e.to_string(), request_id),
        },

        ClientMessage::Resolve {
            local_id,
            resolution,
            request_id,
        } => match handle_resolve(orchestrator, &local_id, ResolveRequest { resolution }).await {
            Ok(report) => ServerMessage::Resolved { report, request_id },
            Err(e) => ServerMessage::error(e.to_string(), request_id),
        },

        ClientMessage::Ping => ServerMessage::Pong,
    }
}
