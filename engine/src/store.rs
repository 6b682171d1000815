//! Event Store - the local authoritative cache of calendar events.
//!
//! The store holds events (including tombstones), the link table and the sync
//! checkpoint. Sync passes never write piecemeal: they stage a [`ChangeBatch`]
//! and [`EventStore::commit`] applies it all-or-nothing.

use crate::{
    error::Result, CalendarEvent, Error, EventId, EventLink, LinkTable, Revision, StoreSnapshot,
    SyncCheckpoint, Timestamp,
};
use std::collections::BTreeMap;

/// Precondition on the stored revision of an event, checked at commit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expected {
    /// The event must not exist yet
    Absent,
    /// The event must exist with exactly this revision
    Revision(Revision),
    /// No precondition
    Any,
}

impl Expected {
    /// Whether `stored` satisfies the precondition.
    pub fn holds(&self, stored: Option<&CalendarEvent>) -> bool {
        match (self, stored) {
            (Expected::Any, _) => true,
            (Expected::Absent, stored) => stored.is_none(),
            (Expected::Revision(revision), Some(event)) => event.revision == *revision,
            (Expected::Revision(_), None) => false,
        }
    }
}

/// One staged write.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOp {
    /// Write the event exactly as given (revision included)
    Put {
        event: CalendarEvent,
        expected: Expected,
    },
    /// Physically remove the event and its link
    Purge { id: EventId, expected: Expected },
    /// Insert or replace a link
    Link(EventLink),
    /// Remove the link of a local event
    Unlink(EventId),
}

impl BatchOp {
    /// The local event the op writes.
    pub fn event_id(&self) -> &EventId {
        match self {
            BatchOp::Put { event, .. } => &event.id,
            BatchOp::Purge { id, .. } | BatchOp::Unlink(id) => id,
            BatchOp::Link(link) => &link.local_id,
        }
    }
}

/// Writes of one sync step, applied atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeBatch {
    ops: Vec<BatchOp>,
    checkpoint: Option<SyncCheckpoint>,
}

impl ChangeBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, event: CalendarEvent, expected: Expected) -> &mut Self {
        self.ops.push(BatchOp::Put { event, expected });
        self
    }

    pub fn purge(&mut self, id: impl Into<EventId>, expected: Expected) -> &mut Self {
        self.ops.push(BatchOp::Purge {
            id: id.into(),
            expected,
        });
        self
    }

    pub fn link(&mut self, link: EventLink) -> &mut Self {
        self.ops.push(BatchOp::Link(link));
        self
    }

    pub fn unlink(&mut self, local_id: impl Into<EventId>) -> &mut Self {
        self.ops.push(BatchOp::Unlink(local_id.into()));
        self
    }

    /// Advance the checkpoint as part of this batch.
    pub fn advance_checkpoint(&mut self, checkpoint: SyncCheckpoint) -> &mut Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    /// Drop every write whose precondition no longer holds in `store`,
    /// together with all other ops staged for the same event.
    ///
    /// Preconditions are checked against the store as it is now. Returns the
    /// ids of the dropped events.
    pub fn drop_stale(&mut self, store: &impl EventStore) -> Result<Vec<EventId>> {
        let mut stale: Vec<EventId> = Vec::new();
        for op in &self.ops {
            let expected = match op {
                BatchOp::Put { expected, .. } | BatchOp::Purge { expected, .. } => expected,
                BatchOp::Link(_) | BatchOp::Unlink(_) => continue,
            };
            let id = op.event_id();
            if !stale.contains(id) && !expected.holds(store.get(id)?.as_ref()) {
                stale.push(id.clone());
            }
        }
        if !stale.is_empty() {
            self.ops.retain(|op| !stale.contains(op.event_id()));
        }
        Ok(stale)
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn checkpoint(&self) -> Option<&SyncCheckpoint> {
        self.checkpoint.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty() && self.checkpoint.is_none()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// Storage interface for events, links and the checkpoint.
///
/// All operations are synchronous. Backends report IO failures as
/// [`Error::StoreUnavailable`].
pub trait EventStore {
    /// Get an event by ID, tombstones included.
    fn get(&self, id: &str) -> Result<Option<CalendarEvent>>;

    /// Insert or update an event, returning the stored version.
    ///
    /// Writing identical content is a no-op that keeps the revision.
    fn upsert(&mut self, event: CalendarEvent) -> Result<CalendarEvent>;

    /// Tombstone an event. The event stays until its remote deletion is
    /// confirmed by a sync pass.
    fn delete(&mut self, id: &str, timestamp: Timestamp) -> Result<CalendarEvent>;

    /// Events modified at or after `since` (all events for `None`), ordered
    /// by last-modified time, then by ID.
    fn list_changed_since(&self, since: Option<Timestamp>) -> Result<Vec<CalendarEvent>>;

    /// Every event, tombstones included, in ID order.
    fn all(&self) -> Result<Vec<CalendarEvent>>;

    fn link_for(&self, local_id: &str) -> Result<Option<EventLink>>;

    fn link_for_remote(&self, remote_id: &str) -> Result<Option<EventLink>>;

    fn set_link(&mut self, link: EventLink) -> Result<()>;

    /// A copy of the whole link table.
    fn links(&self) -> Result<LinkTable>;

    fn checkpoint(&self) -> Result<SyncCheckpoint>;

    /// Apply a batch atomically. On error nothing is written.
    fn commit(&mut self, batch: ChangeBatch) -> Result<()>;

    fn export_state(&self) -> Result<StoreSnapshot>;

    /// Replace the whole state with a snapshot.
    fn import_state(&mut self, snapshot: StoreSnapshot) -> Result<()>;
}

/// In-memory [`EventStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    events: BTreeMap<EventId, CalendarEvent>,
    links: LinkTable,
    checkpoint: SyncCheckpoint,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a store from a snapshot.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Result<Self> {
        let mut store = Self::new();
        store.import_state(snapshot)?;
        Ok(store)
    }

    /// Count of active (non-deleted) events.
    pub fn len(&self) -> usize {
        self.events.values().filter(|e| e.is_active()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_expected(&self, id: &str, expected: Expected) -> Result<()> {
        let stored = self.events.get(id);
        match (expected, stored) {
            (Expected::Any, _) => Ok(()),
            (Expected::Absent, None) => Ok(()),
            (Expected::Absent, Some(_)) => Err(Error::EventAlreadyExists(id.to_string())),
            (Expected::Revision(_), None) => Err(Error::EventNotFound(id.to_string())),
            (Expected::Revision(expected), Some(event)) if event.revision != expected => {
                Err(Error::VersionMismatch {
                    id: id.to_string(),
                    expected,
                    actual: event.revision,
                })
            }
            (Expected::Revision(_), Some(_)) => Ok(()),
        }
    }

    fn apply_op(&mut self, op: BatchOp) -> Result<()> {
        match op {
            BatchOp::Put { event, expected } => {
                self.check_expected(&event.id, expected)?;
                validate_event(&event)?;
                self.events.insert(event.id.clone(), event);
            }
            BatchOp::Purge { id, expected } => {
                self.check_expected(&id, expected)?;
                self.events.remove(&id);
                self.links.remove(&id);
            }
            BatchOp::Link(link) => {
                if !self.events.contains_key(&link.local_id) {
                    return Err(Error::DanglingLink(link.local_id));
                }
                self.links.insert(link)?;
            }
            BatchOp::Unlink(id) => {
                self.links.remove(&id);
            }
        }
        Ok(())
    }
}

fn validate_event(event: &CalendarEvent) -> Result<()> {
    if event.id.is_empty() {
        return Err(Error::InvalidEvent {
            id: event.id.clone(),
            reason: "empty identifier".to_string(),
        });
    }
    if event.fields.end < event.fields.start {
        return Err(Error::InvalidEvent {
            id: event.id.clone(),
            reason: format!(
                "end {} is before start {}",
                event.fields.end, event.fields.start
            ),
        });
    }
    Ok(())
}

impl EventStore for MemoryStore {
    fn get(&self, id: &str) -> Result<Option<CalendarEvent>> {
        Ok(self.events.get(id).cloned())
    }

    fn upsert(&mut self, event: CalendarEvent) -> Result<CalendarEvent> {
        validate_event(&event)?;

        let stored = match self.events.get(&event.id) {
            Some(existing) if existing.same_content(&event) => return Ok(existing.clone()),
            Some(existing) => CalendarEvent {
                revision: existing.revision + 1,
                ..event
            },
            None => CalendarEvent { revision: 1, ..event },
        };

        self.events.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    fn delete(&mut self, id: &str, timestamp: Timestamp) -> Result<CalendarEvent> {
        let event = self
            .events
            .get_mut(id)
            .ok_or_else(|| Error::EventNotFound(id.to_string()))?;

        if event.is_active() {
            event.mark_deleted(timestamp);
        }
        Ok(event.clone())
    }

    fn list_changed_since(&self, since: Option<Timestamp>) -> Result<Vec<CalendarEvent>> {
        let mut changed: Vec<CalendarEvent> = self
            .events
            .values()
            .filter(|e| since.map_or(true, |since| e.last_modified >= since))
            .cloned()
            .collect();
        changed.sort_by(|a, b| {
            a.last_modified
                .cmp(&b.last_modified)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(changed)
    }

    fn all(&self) -> Result<Vec<CalendarEvent>> {
        Ok(self.events.values().cloned().collect())
    }

    fn link_for(&self, local_id: &str) -> Result<Option<EventLink>> {
        Ok(self.links.by_local(local_id).cloned())
    }

    fn link_for_remote(&self, remote_id: &str) -> Result<Option<EventLink>> {
        Ok(self.links.by_remote(remote_id).cloned())
    }

    fn set_link(&mut self, link: EventLink) -> Result<()> {
        if !self.events.contains_key(&link.local_id) {
            return Err(Error::DanglingLink(link.local_id));
        }
        self.links.insert(link)
    }

    fn links(&self) -> Result<LinkTable> {
        Ok(self.links.clone())
    }

    fn checkpoint(&self) -> Result<SyncCheckpoint> {
        Ok(self.checkpoint.clone())
    }

    fn commit(&mut self, batch: ChangeBatch) -> Result<()> {
        // Stage on a copy so a failing op leaves the store untouched
        let mut staged = self.clone();
        for op in batch.ops {
            staged.apply_op(op)?;
        }
        if let Some(checkpoint) = batch.checkpoint {
            staged.checkpoint = checkpoint;
        }
        *self = staged;
        Ok(())
    }

    fn export_state(&self) -> Result<StoreSnapshot> {
        let mut snapshot = StoreSnapshot::new();
        for event in self.events.values() {
            snapshot.add_event(event.clone());
        }
        for link in self.links.iter() {
            snapshot.add_link(link.clone());
        }
        snapshot.checkpoint = self.checkpoint.clone();
        Ok(snapshot)
    }

    fn import_state(&mut self, snapshot: StoreSnapshot) -> Result<()> {
        snapshot.validate()?;

        let links = LinkTable::from_links(snapshot.links)?;
        self.events = snapshot.events;
        self.links = links;
        self.checkpoint = snapshot.checkpoint;
        Ok(())
    }
}
