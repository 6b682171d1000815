//! Sync error taxonomy.

use calsync_engine::EventId;

use crate::db::RepositoryError;
use crate::remote::RemoteError;

/// Errors surfaced by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// Local storage or persistence failed; nothing was kept.
    #[error("local storage unavailable: {0}")]
    StoreUnavailable(String),

    /// Transient provider failure; the caller may retry.
    #[error("network failure: {0}")]
    NetworkFailure(String),

    /// The provider no longer serves the stored delta cursor.
    #[error("delta cursor expired")]
    CursorExpired,

    #[error("a sync session is already in progress")]
    SyncAlreadyInProgress,

    #[error("sync cancelled")]
    Cancelled,

    #[error("no pending conflict for event {0}")]
    ConflictNotFound(EventId),

    #[error("no conflicts pending")]
    NoPendingConflicts,

    #[error(transparent)]
    Engine(calsync_engine::Error),
}

impl From<calsync_engine::Error> for SyncError {
    fn from(error: calsync_engine::Error) -> Self {
        match error {
            calsync_engine::Error::StoreUnavailable(reason) => SyncError::StoreUnavailable(reason),
            other => SyncError::Engine(other),
        }
    }
}

impl From<RemoteError> for SyncError {
    fn from(error: RemoteError) -> Self {
        match error {
            RemoteError::Network(reason) => SyncError::NetworkFailure(reason),
            RemoteError::CursorExpired => SyncError::CursorExpired,
            RemoteError::NotFound(remote_id) => {
                SyncError::NetworkFailure(format!("remote event {} not found", remote_id))
            }
        }
    }
}

impl From<RepositoryError> for SyncError {
    fn from(error: RepositoryError) -> Self {
        SyncError::StoreUnavailable(error.to_string())
    }
}
