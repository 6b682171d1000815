//! Unified error handling for the server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::sync::SyncError;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(&'static str),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

fn engine_status(error: &calsync_engine::Error) -> StatusCode {
    use calsync_engine::Error;
    match error {
        Error::EventNotFound(_) => StatusCode::NOT_FOUND,
        Error::VersionMismatch { .. } | Error::EventAlreadyExists(_) | Error::LinkConflict { .. } => {
            StatusCode::CONFLICT
        }
        Error::InvalidEvent { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn sync_status(error: &SyncError) -> StatusCode {
    match error {
        SyncError::SyncAlreadyInProgress | SyncError::Cancelled => StatusCode::CONFLICT,
        SyncError::ConflictNotFound(_) | SyncError::NoPendingConflicts => StatusCode::NOT_FOUND,
        SyncError::NetworkFailure(_) | SyncError::CursorExpired => StatusCode::BAD_GATEWAY,
        SyncError::StoreUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        SyncError::Engine(e) => engine_status(e),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, details) = match &self {
            AppError::Sync(e) => {
                let status = sync_status(e);
                if status.is_server_error() {
                    tracing::error!("Sync error: {}", e);
                } else {
                    tracing::warn!("Sync error: {}", e);
                }
                (status, e.to_string(), None)
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), None),
            AppError::Unauthorized(reason) => {
                tracing::warn!("Rejected request: {}", reason);
                (StatusCode::UNAUTHORIZED, "Unauthorized".to_string(), Some(reason.to_string()))
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    Some(msg.clone()),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_message,
            details,
        });

        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;
