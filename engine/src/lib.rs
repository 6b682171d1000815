//! # Calsync Engine
//!
//! The deterministic core of a bidirectional calendar sync engine.
//!
//! This crate decides *what* a sync pass has to do: it keeps the local event
//! store, tracks which local event is linked to which provider event, diffs
//! both sides and classifies and resolves conflicts. It never talks to the
//! provider or to disk itself; the server crate drives it.
//!
//! ## Design Principles
//!
//! - **No IO**: Engine has no knowledge of files, network, or the provider
//! - **Deterministic**: Same inputs always produce the same actions
//! - **Atomic**: Sync writes are staged in a [`ChangeBatch`] and committed
//!   all-or-nothing
//!
//! ## Core Concepts
//!
//! ### Events and links
//!
//! A [`CalendarEvent`] is the local copy, versioned by a revision counter and
//! soft-deleted with a tombstone. A [`RemoteEvent`] is the provider's copy,
//! versioned by an ETag. An [`EventLink`] pairs the two and remembers the
//! revision, ETag and content last synced.
//!
//! ### Diff
//!
//! [`diff`](diff::diff) compares local candidates with a [`RemoteSet`] and
//! emits ordered [`SyncAction`]s. When both sides changed the same event the
//! action is a [`SyncConflict`].
//!
//! ### Resolution
//!
//! [`resolve`](resolve::resolve) settles a conflict with a [`Resolution`]:
//! keep local, take remote, merge field-wise against the last synced content,
//! or skip.
//!
//! ## Quick Start
//!
//! ```rust
//! use calsync_engine::{
//!     diff, CalendarEvent, EventFields, EventStore, LinkTable, MemoryStore, RemoteEvent,
//!     RemoteSet, SyncAction,
//! };
//!
//! let mut store = MemoryStore::new();
//! store
//!     .upsert(CalendarEvent::new("evt-1", EventFields::new("Lunch", 0, 3_600_000), 1_000))
//!     .unwrap();
//!
//! let remote = RemoteSet::Snapshot(vec![RemoteEvent::new(
//!     "r-7",
//!     EventFields::new("Gym", 0, 3_600_000),
//!     2_000,
//!     "etag-1",
//! )]);
//!
//! let local = store.all().unwrap().into_iter().map(|e| (e.id.clone(), e)).collect();
//! let actions = diff(&local, &remote, &LinkTable::new());
//!
//! assert!(matches!(actions[0], SyncAction::CreateRemote { .. }));
//! assert!(matches!(actions[1], SyncAction::CreateLocal { .. }));
//! ```
//!
//! ## Persistence
//!
//! Use [`EventStore::export_state`] and [`EventStore::import_state`] with
//! [`StoreSnapshot`]. Snapshots serialize to JSON with deterministic ordering.

pub mod checkpoint;
pub mod diff;
pub mod error;
pub mod event;
pub mod link;
pub mod resolve;
pub mod snapshot;
pub mod status;
pub mod store;

// Re-export main types at crate root
pub use checkpoint::{DeltaCursor, SyncCheckpoint};
pub use diff::{diff, DiffSummary, RemoteSet, SyncAction};
pub use error::Error;
pub use event::{CalendarEvent, EventField, EventFields, RemoteChange, RemoteEvent};
pub use link::{EventLink, LinkTable};
pub use resolve::{
    classify, resolve, ConflictType, MergeDegradation, Resolution, ResolveOutcome, SyncConflict,
};
pub use snapshot::{StoreSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use status::{StatusBoard, SyncStatus};
pub use store::{BatchOp, ChangeBatch, EventStore, Expected, MemoryStore};

/// Type aliases for clarity
pub type EventId = String;
pub type RemoteId = String;
pub type Revision = u64;
pub type Timestamp = u64;
pub type ETag = String;
