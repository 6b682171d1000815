//! Snapshot types for persisting and restoring store state.
//!
//! Snapshots are the bridge between the in-memory store and durable storage.
//! They serialize deterministically so the same state always produces the
//! same bytes.

use crate::{error::Result, CalendarEvent, Error, EventId, EventLink, SyncCheckpoint};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time snapshot of the store: events, links and checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// All events by ID, tombstones included
    pub events: BTreeMap<EventId, CalendarEvent>,
    /// Links in ascending local ID order
    pub links: Vec<EventLink>,
    pub checkpoint: SyncCheckpoint,
}

impl Default for StoreSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreSnapshot {
    /// Create a new empty snapshot.
    pub fn new() -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            events: BTreeMap::new(),
            links: Vec::new(),
            checkpoint: SyncCheckpoint::default(),
        }
    }

    pub fn add_event(&mut self, event: CalendarEvent) {
        self.events.insert(event.id.clone(), event);
    }

    pub fn add_link(&mut self, link: EventLink) {
        self.links.push(link);
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Count active (non-deleted) events.
    pub fn active_event_count(&self) -> usize {
        self.events.values().filter(|e| e.is_active()).count()
    }

    /// Check internal consistency: every link points at a stored event and
    /// no local or remote ID is linked twice.
    pub fn validate(&self) -> Result<()> {
        if self.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                self.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        for (id, event) in &self.events {
            if id != &event.id {
                return Err(Error::InvalidSnapshot(format!(
                    "event stored under '{}' has id '{}'",
                    id, event.id
                )));
            }
        }

        let mut locals = BTreeSet::new();
        let mut remotes = BTreeSet::new();
        for link in &self.links {
            if !self.events.contains_key(&link.local_id) {
                return Err(Error::DanglingLink(link.local_id.clone()));
            }
            if !locals.insert(&link.local_id) || !remotes.insert(&link.remote_id) {
                return Err(Error::InvalidSnapshot(format!(
                    "duplicate link {} <-> {}",
                    link.local_id, link.remote_id
                )));
            }
        }

        Ok(())
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON with deterministic ordering.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON and validate.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;
        snapshot.validate()?;
        Ok(snapshot)
    }
}
