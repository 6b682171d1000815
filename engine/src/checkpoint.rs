//! Sync checkpoint: where the next incremental pass starts from.

use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque provider token naming a position in the remote change log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeltaCursor(String);

impl DeltaCursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeltaCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// State carried between passes. Only advanced after a pass fully commits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCheckpoint {
    /// Start time of the last committed pass (milliseconds since epoch)
    pub last_sync: Option<Timestamp>,
    /// Delta cursor returned by the provider during that pass
    pub cursor: Option<DeltaCursor>,
}

impl SyncCheckpoint {
    pub fn new(last_sync: Timestamp, cursor: Option<DeltaCursor>) -> Self {
        Self {
            last_sync: Some(last_sync),
            cursor,
        }
    }

    /// Whether any pass has ever committed.
    pub fn is_initial(&self) -> bool {
        self.last_sync.is_none()
    }
}
