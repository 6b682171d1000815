//! Remote Adapter: the capability interface over the calendar provider.
//!
//! The orchestrator only ever talks to the provider through
//! [`RemoteAdapter`]. Writes are optimistic: callers pass the ETag they
//! believe current and a stale ETag is rejected with the provider's state.

mod memory;

pub use memory::{Call, MemoryCalendar};

use async_trait::async_trait;
use calsync_engine::{
    CalendarEvent, DeltaCursor, ETag, EventFields, RemoteChange, RemoteEvent, RemoteId, Timestamp,
};

/// Everything the provider holds, plus a cursor for the next delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullSnapshot {
    pub events: Vec<RemoteEvent>,
    pub cursor: DeltaCursor,
}

/// Changes since a cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    pub changes: Vec<RemoteChange>,
    pub cursor: DeltaCursor,
}

/// A write sent to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushChange {
    /// `None` creates a new remote event
    pub remote_id: Option<RemoteId>,
    pub fields: EventFields,
    pub last_modified: Timestamp,
    /// ETag the caller believes current; required for updates
    pub if_match: Option<ETag>,
}

impl PushChange {
    /// Create a remote copy of a local event.
    pub fn create(event: &CalendarEvent) -> Self {
        Self {
            remote_id: None,
            fields: event.fields.clone(),
            last_modified: event.last_modified,
            if_match: None,
        }
    }

    /// Overwrite a remote event, guarded by `if_match`.
    pub fn update(remote_id: &str, event: &CalendarEvent, if_match: &str) -> Self {
        Self {
            remote_id: Some(remote_id.to_string()),
            fields: event.fields.clone(),
            last_modified: event.last_modified,
            if_match: Some(if_match.to_string()),
        }
    }
}

/// Result of a push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// Written; carries the provider's new version
    Accepted(RemoteEvent),
    /// The ETag was stale; carries the provider's current version
    Rejected(RemoteEvent),
}

/// Result of a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// Provider errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("network failure: {0}")]
    Network(String),

    #[error("delta cursor expired")]
    CursorExpired,

    #[error("remote event not found: {0}")]
    NotFound(RemoteId),
}

/// Fetch/push/delta API of a calendar provider.
#[async_trait]
pub trait RemoteAdapter: Send + Sync {
    /// Fetch every event.
    async fn fetch_full(&self) -> Result<FullSnapshot, RemoteError>;

    /// Fetch changes since `cursor`. Fails with
    /// [`RemoteError::CursorExpired`] when the provider no longer serves it.
    async fn fetch_delta(&self, cursor: &DeltaCursor) -> Result<Delta, RemoteError>;

    /// Create or update an event. Updating an event that no longer exists
    /// fails with [`RemoteError::NotFound`].
    async fn push(&self, change: PushChange) -> Result<PushOutcome, RemoteError>;

    async fn delete(&self, remote_id: &str) -> Result<DeleteOutcome, RemoteError>;
}
