//! Error types for the calsync engine.

use crate::{EventId, RemoteId, Revision};
use thiserror::Error;

/// All possible errors from the calsync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Store errors
    #[error("event store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("event not found: {0}")]
    EventNotFound(EventId),

    #[error("event already exists: {0}")]
    EventAlreadyExists(EventId),

    #[error("version mismatch for event {id}: expected revision {expected}, found {actual}")]
    VersionMismatch {
        id: EventId,
        expected: Revision,
        actual: Revision,
    },

    #[error("invalid event {id}: {reason}")]
    InvalidEvent { id: EventId, reason: String },

    // Link errors
    #[error("remote event {remote_id} is already linked to {linked_to}")]
    LinkConflict {
        remote_id: RemoteId,
        linked_to: EventId,
    },

    #[error("link references unknown event: {0}")]
    DanglingLink(EventId),

    // State errors
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::EventNotFound("evt-1".into());
        assert_eq!(err.to_string(), "event not found: evt-1");

        let err = Error::VersionMismatch {
            id: "evt-1".into(),
            expected: 1,
            actual: 2,
        };
        assert_eq!(
            err.to_string(),
            "version mismatch for event evt-1: expected revision 1, found 2"
        );

        let err = Error::LinkConflict {
            remote_id: "r-1".into(),
            linked_to: "evt-9".into(),
        };
        assert_eq!(
            err.to_string(),
            "remote event r-1 is already linked to evt-9"
        );
    }
}
