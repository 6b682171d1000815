//! WebSocket message protocol definitions.
//!
//! All messages are JSON-encoded and use snake_case for field names.

use calsync_engine::{EventId, Resolution, StatusBoard};
use serde::{Deserialize, Serialize};

use crate::sync::{ResolutionReport, SyncMode, SyncReport};

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Run a sync pass.
    Sync {
        /// `full` or `incremental`
        mode: SyncMode,
        /// Request ID for correlating responses
        #[serde(default)]
        request_id: Option<String>,
    },

    /// Resolve a pending conflict.
    Resolve {
        local_id: EventId,
        resolution: Resolution,
        #[serde(default)]
        request_id: Option<String>,
    },

    /// Keep-alive ping.
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The status board changed. Sent to every connection.
    Status { board: StatusBoard },

    /// Response to a sync request.
    SyncResult {
        report: SyncReport,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// Response to a resolve request.
    Resolved {
        report: ResolutionReport,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// Response to ping.
    Pong,

    /// Error message.
    Error {
        /// Error description
        message: String,
        /// Request ID from the original request (if applicable)
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

impl ServerMessage {
    /// Create an error message.
    pub fn error(message: impl Into<String>, request_id: Option<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            request_id,
        }
    }

    pub fn status(board: StatusBoard) -> Self {
        ServerMessage::Status { board }
    }
}
