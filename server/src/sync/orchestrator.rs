//! Sync Orchestrator: drives full and incremental passes.
//!
//! One session runs at a time. A pass fetches from the provider, diffs
//! against the event store, pushes local changes, commits every local write
//! of the pass in one [`ChangeBatch`] and persists the result. Conflicts are
//! parked on the status board until the caller resolves them.
//!
//! Links of remote writes the provider accepted are always committed. Local
//! writes staged against an event the user edited during the pass are
//! dropped, and the checkpoint then stays put so the next pass sees them.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use calsync_engine::{
    diff, resolve, CalendarEvent, ChangeBatch, DiffSummary, EventFields, EventId, EventLink,
    EventStore, Expected, LinkTable, MemoryStore, MergeDegradation, RemoteEvent, RemoteSet,
    Resolution, ResolveOutcome, StatusBoard, SyncAction, SyncCheckpoint, SyncConflict, SyncStatus,
    Timestamp,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};

use super::SyncError;
use crate::db::StateRepository;
use crate::now_millis;
use crate::remote::{DeleteOutcome, PushChange, PushOutcome, RemoteAdapter, RemoteError};

/// Kind of pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncMode {
    Full,
    Incremental,
}

/// Summary of a finished pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// The pass actually run; an incremental request may fall back to full
    pub mode: SyncMode,
    pub summary: DiffSummary,
    /// Conflicts left for the caller
    pub conflicts: usize,
    pub status: SyncStatus,
}

/// What a resolution did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum ResolutionOutcome {
    /// Committed locally and pushed
    Applied {
        event: CalendarEvent,
        #[serde(skip_serializing_if = "Option::is_none")]
        degradation: Option<MergeDegradation>,
    },
    /// Left pending
    Skipped,
    /// The provider moved on; the conflict was renewed with its state
    Rejected { conflict: SyncConflict },
    /// The event was edited locally meanwhile; the conflict was renewed with
    /// the current local version and nothing was pushed
    Superseded { conflict: SyncConflict },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionReport {
    pub local_id: EventId,
    #[serde(flatten)]
    pub outcome: ResolutionOutcome,
    /// Conflicts still pending, skipped ones included
    pub remaining: usize,
    pub status: SyncStatus,
}

/// Result of a remote-change notification.
#[derive(Debug, Clone, PartialEq)]
pub enum NotifyOutcome {
    /// Real-time updates are off
    Ignored,
    /// A session was active; a re-sync was requested
    Deferred,
    Synced(SyncReport),
}

/// State owned by the holder of the session lock.
#[derive(Debug, Default)]
struct Session {
    /// Checkpoint of the last pass, committed once its conflicts are resolved
    held_checkpoint: Option<SyncCheckpoint>,
}

/// Local writes and parked conflicts collected while applying actions.
#[derive(Debug, Default)]
struct Applied {
    batch: ChangeBatch,
    /// Links for remote writes the provider accepted
    remote_links: Vec<EventLink>,
    conflicts: Vec<SyncConflict>,
}

struct PassResult {
    mode: SyncMode,
    summary: DiffSummary,
    conflicts: Vec<SyncConflict>,
}

enum ResolutionPush {
    Accepted(ChangeBatch),
    Rejected(RemoteEvent),
}

fn synced_link(event: &CalendarEvent, remote: &RemoteEvent) -> EventLink {
    EventLink::new(
        event.id.clone(),
        remote.remote_id.clone(),
        event.revision,
        remote.etag.clone(),
        remote.fields.clone(),
    )
}

/// Coordinates the event store, the provider and the durable repository.
pub struct SyncOrchestrator {
    store: Mutex<MemoryStore>,
    remote: Arc<dyn RemoteAdapter>,
    repository: Arc<dyn StateRepository>,
    session: Mutex<Session>,
    status: watch::Sender<StatusBoard>,
    cancel_requested: AtomicBool,
    resync_needed: AtomicBool,
    realtime_enabled: AtomicBool,
}

impl SyncOrchestrator {
    /// Create an orchestrator over an empty store.
    pub fn new(remote: Arc<dyn RemoteAdapter>, repository: Arc<dyn StateRepository>) -> Self {
        Self::with_store(MemoryStore::new(), remote, repository)
    }

    /// Create an orchestrator over the state saved in `repository`.
    pub async fn restore(
        remote: Arc<dyn RemoteAdapter>,
        repository: Arc<dyn StateRepository>,
    ) -> Result<Self, SyncError> {
        let store = match repository.load().await? {
            Some(snapshot) => MemoryStore::from_snapshot(snapshot)?,
            None => MemoryStore::new(),
        };
        tracing::info!(events = store.len(), "Restored event store");
        Ok(Self::with_store(store, remote, repository))
    }

    fn with_store(
        store: MemoryStore,
        remote: Arc<dyn RemoteAdapter>,
        repository: Arc<dyn StateRepository>,
    ) -> Self {
        let board = StatusBoard {
            last_sync_time: store.checkpoint().ok().and_then(|c| c.last_sync),
            ..StatusBoard::default()
        };
        let (status, _) = watch::channel(board);

        Self {
            store: Mutex::new(store),
            remote,
            repository,
            session: Mutex::new(Session::default()),
            status,
            cancel_requested: AtomicBool::new(false),
            resync_needed: AtomicBool::new(false),
            realtime_enabled: AtomicBool::new(false),
        }
    }

    // ---------------------------------------------------------------------
    // Status surface
    // ---------------------------------------------------------------------

    pub fn status(&self) -> StatusBoard {
        self.status.borrow().clone()
    }

    /// Observe every status change.
    pub fn subscribe(&self) -> watch::Receiver<StatusBoard> {
        self.status.subscribe()
    }

    pub fn pending_conflicts(&self) -> Vec<SyncConflict> {
        self.status.borrow().pending_conflicts.clone()
    }

    fn update_board(
        &self,
        f: impl FnOnce(&mut StatusBoard) -> calsync_engine::error::Result<()>,
    ) -> Result<(), SyncError> {
        let mut result = Ok(());
        self.status.send_modify(|board| result = f(board));
        Ok(result?)
    }

    fn set_progress(&self, progress: f64) {
        self.status.send_modify(|board| board.advance(progress));
    }

    // ---------------------------------------------------------------------
    // Passes
    // ---------------------------------------------------------------------

    /// Fetch everything from the provider and reconcile it with the store.
    pub async fn perform_full_sync(&self) -> Result<SyncReport, SyncError> {
        let mut session = self
            .session
            .try_lock()
            .map_err(|_| SyncError::SyncAlreadyInProgress)?;
        let started_at = self.begin_session(&mut session)?;
        tracing::info!("Starting full sync");

        let result = self.full_pass(&mut session, started_at).await;
        self.finish_session(result)
    }

    /// Reconcile the changes since the stored cursor. Without a cursor this
    /// is a full sync; an expired cursor falls back to one full fetch.
    pub async fn perform_incremental_sync(&self) -> Result<SyncReport, SyncError> {
        let mut session = self
            .session
            .try_lock()
            .map_err(|_| SyncError::SyncAlreadyInProgress)?;
        let started_at = self.begin_session(&mut session)?;
        tracing::info!("Starting incremental sync");

        let result = self.incremental_pass(&mut session, started_at).await;
        self.finish_session(result)
    }

    fn begin_session(&self, session: &mut Session) -> Result<Timestamp, SyncError> {
        session.held_checkpoint = None;
        self.update_board(StatusBoard::begin)?;
        Ok(now_millis())
    }

    fn finish_session(&self, result: Result<PassResult, SyncError>) -> Result<SyncReport, SyncError> {
        self.cancel_requested.store(false, Ordering::SeqCst);

        let pass = match result {
            Ok(pass) => pass,
            Err(error) => {
                tracing::warn!(error = %error, "Sync failed");
                if let Err(e) = self.update_board(|board| board.fail(error.to_string())) {
                    tracing::error!(error = %e, "Could not record sync failure");
                }
                return Err(error);
            }
        };

        let conflicts = pass.conflicts.len();
        if conflicts == 0 {
            self.update_board(|board| board.complete(now_millis()))?;
            tracing::info!(mode = ?pass.mode, actions = pass.summary.total(), "Sync completed");
        } else {
            self.update_board(|board| board.await_resolution(pass.conflicts))?;
            tracing::info!(mode = ?pass.mode, conflicts, "Sync waiting for conflict resolution");
        }

        Ok(SyncReport {
            mode: pass.mode,
            summary: pass.summary,
            conflicts,
            status: self.status().status,
        })
    }

    async fn full_pass(
        &self,
        session: &mut Session,
        started_at: Timestamp,
    ) -> Result<PassResult, SyncError> {
        let snapshot = self.remote.fetch_full().await?;
        self.set_progress(0.2);

        let local = self.store.lock().await.all()?;
        let remote = RemoteSet::Snapshot(snapshot.events);
        let checkpoint = SyncCheckpoint::new(started_at, Some(snapshot.cursor));
        self.run_pass(session, SyncMode::Full, local, remote, checkpoint)
            .await
    }

    async fn incremental_pass(
        &self,
        session: &mut Session,
        started_at: Timestamp,
    ) -> Result<PassResult, SyncError> {
        let checkpoint = self.store.lock().await.checkpoint()?;
        let Some(cursor) = checkpoint.cursor else {
            tracing::debug!("No delta cursor yet, running a full sync");
            return self.full_pass(session, started_at).await;
        };

        let delta = match self.remote.fetch_delta(&cursor).await {
            Ok(delta) => delta,
            Err(RemoteError::CursorExpired) => {
                tracing::warn!(cursor = %cursor, "Delta cursor expired, falling back to full sync");
                return self.full_pass(session, started_at).await;
            }
            Err(e) => return Err(e.into()),
        };
        self.set_progress(0.2);

        let remote = RemoteSet::Delta(delta.changes);
        let local = {
            let store = self.store.lock().await;
            incremental_candidates(&store, checkpoint.last_sync, &remote)?
        };
        let next = SyncCheckpoint::new(started_at, Some(delta.cursor));
        self.run_pass(session, SyncMode::Incremental, local, remote, next)
            .await
    }

    async fn run_pass(
        &self,
        session: &mut Session,
        mode: SyncMode,
        local: Vec<CalendarEvent>,
        remote: RemoteSet,
        checkpoint: SyncCheckpoint,
    ) -> Result<PassResult, SyncError> {
        let links = self.store.lock().await.links()?;
        let local: BTreeMap<EventId, CalendarEvent> =
            local.into_iter().map(|e| (e.id.clone(), e)).collect();

        let actions = diff(&local, &remote, &links);
        let summary = DiffSummary::of(&actions);
        tracing::debug!(
            mode = ?mode,
            candidates = local.len(),
            remote_changes = remote.len(),
            actions = summary.total(),
            conflicts = summary.conflicts,
            "Diff computed"
        );
        self.set_progress(0.3);

        if self.cancel_requested.load(Ordering::SeqCst) {
            return Err(SyncError::Cancelled);
        }

        let total = actions.len().max(1) as f64;
        let mut applied = Applied::default();
        for (index, action) in actions.into_iter().enumerate() {
            if let Err(error) = self.apply_action(action, &mut applied).await {
                // Keep what the provider already accepted; the checkpoint stays
                tracing::warn!(error = %error, applied = index, "Pass interrupted");
                self.commit_pass(applied.batch, applied.remote_links, None)
                    .await?;
                return Err(error);
            }
            self.set_progress(0.3 + 0.6 * (index + 1) as f64 / total);
        }

        let (advance, hold) = if applied.conflicts.is_empty() {
            (Some(checkpoint), None)
        } else {
            (None, Some(checkpoint))
        };
        let stale = self
            .commit_pass(applied.batch, applied.remote_links, advance)
            .await?;
        if stale.is_empty() {
            session.held_checkpoint = hold;
        } else {
            tracing::info!(
                stale = ?stale,
                "Events edited during the pass, leaving them to the next pass"
            );
        }
        self.set_progress(0.95);

        Ok(PassResult {
            mode,
            summary,
            conflicts: applied.conflicts,
        })
    }

    async fn apply_action(&self, action: SyncAction, applied: &mut Applied) -> Result<(), SyncError> {
        let batch = &mut applied.batch;
        match action {
            SyncAction::CreateLocal { remote } => {
                let local_id = self.free_local_id(&remote.remote_id).await?;
                let event = CalendarEvent::from_remote(local_id, &remote);
                batch
                    .put(event.clone(), Expected::Absent)
                    .link(synced_link(&event, &remote));
            }
            SyncAction::CreateRemote { local, link } => {
                if let Some(link) = link {
                    tracing::info!(
                        local_id = %local.id,
                        remote_id = %link.remote_id,
                        "Remote copy deleted while edited locally, recreating it"
                    );
                }
                let created = self.push_new(&local).await?;
                applied.remote_links.push(synced_link(&local, &created));
            }
            SyncAction::UpdateRemote { local, link } => {
                let change = PushChange::update(&link.remote_id, &local, &link.synced_etag);
                match self.remote.push(change).await {
                    Ok(PushOutcome::Accepted(remote)) => {
                        applied.remote_links.push(synced_link(&local, &remote));
                    }
                    Ok(PushOutcome::Rejected(current)) => {
                        tracing::info!(local_id = %local.id, "Push rejected, provider holds a newer version");
                        match SyncConflict::detect(local.clone(), current.clone(), Some(link.synced_fields)) {
                            Some(conflict) => applied.conflicts.push(conflict),
                            None => {
                                batch.link(synced_link(&local, &current));
                            }
                        }
                    }
                    Err(RemoteError::NotFound(_)) => {
                        let created = self.push_new(&local).await?;
                        applied.remote_links.push(synced_link(&local, &created));
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            SyncAction::DeleteRemote { local, link } => {
                if self.remote.delete(&link.remote_id).await? == DeleteOutcome::NotFound {
                    tracing::debug!(remote_id = %link.remote_id, "Remote event already gone");
                }
                batch.purge(local.id, Expected::Revision(local.revision));
            }
            SyncAction::UpdateLocal { local, remote } => {
                let updated = local.with_remote_content(&remote);
                batch
                    .put(updated.clone(), Expected::Revision(local.revision))
                    .link(synced_link(&updated, &remote));
            }
            SyncAction::DeleteLocal { local, .. } | SyncAction::Purge { local } => {
                batch.purge(local.id, Expected::Revision(local.revision));
            }
            SyncAction::Relink { local, remote } => {
                batch.link(synced_link(&local, &remote));
            }
            SyncAction::Conflict(conflict) => applied.conflicts.push(conflict),
        }
        Ok(())
    }

    async fn push_new(&self, local: &CalendarEvent) -> Result<RemoteEvent, SyncError> {
        match self.remote.push(PushChange::create(local)).await? {
            PushOutcome::Accepted(remote) | PushOutcome::Rejected(remote) => Ok(remote),
        }
    }

    /// Local id for a new mirror of `remote_id`: the remote id itself unless
    /// a local event already uses it.
    async fn free_local_id(&self, remote_id: &str) -> Result<EventId, SyncError> {
        let store = self.store.lock().await;
        if store.get(remote_id)?.is_none() {
            Ok(remote_id.to_string())
        } else {
            Ok(uuid::Uuid::new_v4().to_string())
        }
    }

    // ---------------------------------------------------------------------
    // Conflicts
    // ---------------------------------------------------------------------

    /// Settle one pending conflict: commit the chosen version locally and
    /// push it with the conflict's remote ETag.
    ///
    /// If the event was edited since the conflict was detected, nothing is
    /// pushed and the conflict is renewed with the current local version.
    pub async fn resolve_conflict(
        &self,
        local_id: &str,
        resolution: Resolution,
    ) -> Result<ResolutionReport, SyncError> {
        let mut session = self
            .session
            .try_lock()
            .map_err(|_| SyncError::SyncAlreadyInProgress)?;

        let board = self.status();
        if board.status != SyncStatus::ConflictsPending {
            return Err(SyncError::NoPendingConflicts);
        }
        let conflict = board
            .pending_conflicts
            .iter()
            .find(|c| c.local_id() == local_id)
            .cloned()
            .ok_or_else(|| SyncError::ConflictNotFound(local_id.to_string()))?;

        let (event, degradation) = match resolve(&conflict, resolution) {
            ResolveOutcome::Skipped => {
                tracing::info!(local_id, "Conflict skipped");
                let skipped = SyncConflict {
                    resolution: Some(Resolution::Skip),
                    ..conflict
                };
                let remaining = self.settle_conflict(local_id, Some(skipped))?;
                return Ok(self.resolution_report(local_id, ResolutionOutcome::Skipped, remaining));
            }
            ResolveOutcome::Resolved { event, degradation } => (event, degradation),
        };

        // Nothing reaches the provider if the parked local version is stale
        let current = self
            .store
            .lock()
            .await
            .get(local_id)?
            .ok_or_else(|| calsync_engine::Error::EventNotFound(local_id.to_string()))?;
        let (event, degradation, mut batch) = if current.revision != conflict.local.revision {
            tracing::info!(
                local_id,
                parked = conflict.local.revision,
                current = current.revision,
                "Event edited since the conflict was detected"
            );
            match SyncConflict::detect(current.clone(), conflict.remote.clone(), conflict.base.clone()) {
                Some(renewed) => {
                    let remaining = self.settle_conflict(local_id, Some(renewed.clone()))?;
                    return Ok(self.resolution_report(
                        local_id,
                        ResolutionOutcome::Superseded { conflict: renewed },
                        remaining,
                    ));
                }
                // The edit matches the provider's version
                None => {
                    let mut batch = ChangeBatch::new();
                    batch.link(synced_link(&current, &conflict.remote));
                    (current, None, batch)
                }
            }
        } else {
            if let Some(degradation) = &degradation {
                tracing::warn!(local_id, degradation = ?degradation, "Merge fell back to the local version");
            }
            match self.push_resolution(&conflict, &event).await? {
                ResolutionPush::Accepted(batch) => (event, degradation, batch),
                ResolutionPush::Rejected(remote) => {
                    tracing::info!(local_id, "Resolution rejected, provider holds a newer version");
                    match SyncConflict::detect(conflict.local.clone(), remote.clone(), conflict.base.clone()) {
                        Some(renewed) => {
                            let remaining = self.settle_conflict(local_id, Some(renewed.clone()))?;
                            return Ok(self.resolution_report(
                                local_id,
                                ResolutionOutcome::Rejected { conflict: renewed },
                                remaining,
                            ));
                        }
                        // The provider converged on our local version meanwhile
                        None => {
                            let mut batch = ChangeBatch::new();
                            batch.link(synced_link(&conflict.local, &remote));
                            (conflict.local.clone(), None, batch)
                        }
                    }
                }
            }
        };

        let last = board.pending_conflicts.len() == 1;
        if last {
            if let Some(checkpoint) = session.held_checkpoint.clone() {
                batch.advance_checkpoint(checkpoint);
            }
        }
        self.commit(batch).await?;
        if last {
            session.held_checkpoint = None;
        }

        let remaining = self.settle_conflict(local_id, None)?;
        tracing::info!(local_id, resolution = ?resolution, remaining, "Conflict resolved");
        Ok(self.resolution_report(
            local_id,
            ResolutionOutcome::Applied { event, degradation },
            remaining,
        ))
    }

    async fn push_resolution(
        &self,
        conflict: &SyncConflict,
        event: &CalendarEvent,
    ) -> Result<ResolutionPush, SyncError> {
        let mut batch = ChangeBatch::new();
        let expected = Expected::Revision(conflict.local.revision);

        if event.deleted {
            self.remote.delete(conflict.remote_id()).await?;
            batch.purge(event.id.clone(), expected);
            return Ok(ResolutionPush::Accepted(batch));
        }

        let change = PushChange::update(conflict.remote_id(), event, &conflict.remote.etag);
        let remote = match self.remote.push(change).await {
            Ok(PushOutcome::Accepted(remote)) => remote,
            Ok(PushOutcome::Rejected(current)) => return Ok(ResolutionPush::Rejected(current)),
            Err(RemoteError::NotFound(_)) => self.push_new(event).await?,
            Err(e) => return Err(e.into()),
        };
        batch
            .put(event.clone(), expected)
            .link(synced_link(event, &remote));
        Ok(ResolutionPush::Accepted(batch))
    }

    /// Replace or drop a pending conflict; completes the session once none
    /// are left. Returns the number still pending.
    fn settle_conflict(
        &self,
        local_id: &str,
        replacement: Option<SyncConflict>,
    ) -> Result<usize, SyncError> {
        let mut result = Ok(0);
        self.status.send_modify(|board| {
            match replacement {
                Some(conflict) => {
                    if let Some(slot) = board
                        .pending_conflicts
                        .iter_mut()
                        .find(|c| c.local_id() == local_id)
                    {
                        *slot = conflict;
                    }
                }
                None => board.pending_conflicts.retain(|c| c.local_id() != local_id),
            }
            result = match board.pending_conflicts.len() {
                0 => board.complete(now_millis()).map(|_| 0),
                remaining => Ok(remaining),
            };
        });
        Ok(result?)
    }

    fn resolution_report(
        &self,
        local_id: &str,
        outcome: ResolutionOutcome,
        remaining: usize,
    ) -> ResolutionReport {
        ResolutionReport {
            local_id: local_id.to_string(),
            outcome,
            remaining,
            status: self.status().status,
        }
    }

    // ---------------------------------------------------------------------
    // Session control
    // ---------------------------------------------------------------------

    /// Ask the running pass to stop before it applies anything.
    ///
    /// Returns `false` when no pass is running. A pass already applying
    /// actions finishes normally.
    pub fn cancel(&self) -> bool {
        if !self.status.borrow().status.is_syncing() {
            return false;
        }
        tracing::info!("Cancellation requested");
        self.cancel_requested.store(true, Ordering::SeqCst);
        true
    }

    pub fn realtime_enabled(&self) -> bool {
        self.realtime_enabled.load(Ordering::SeqCst)
    }

    pub fn set_realtime_enabled(&self, enabled: bool) {
        self.realtime_enabled.store(enabled, Ordering::SeqCst);
        self.status.send_modify(|board| board.realtime_enabled = enabled);
        tracing::info!(enabled, "Real-time updates toggled");
    }

    /// React to a provider push notification: run an incremental pass now,
    /// or flag a re-sync if a session is active.
    pub async fn notify_remote_change(&self) -> Result<NotifyOutcome, SyncError> {
        if !self.realtime_enabled() {
            return Ok(NotifyOutcome::Ignored);
        }
        match self.perform_incremental_sync().await {
            Ok(report) => Ok(NotifyOutcome::Synced(report)),
            Err(SyncError::SyncAlreadyInProgress) => {
                tracing::debug!("Session active, re-sync requested");
                self.request_resync();
                Ok(NotifyOutcome::Deferred)
            }
            Err(e) => Err(e),
        }
    }

    pub(crate) fn request_resync(&self) {
        self.resync_needed.store(true, Ordering::SeqCst);
    }

    /// Consume the re-sync flag.
    pub fn take_resync_request(&self) -> bool {
        self.resync_needed.swap(false, Ordering::SeqCst)
    }

    /// Wait until no session holds the lock.
    pub async fn wait_idle(&self) {
        drop(self.session.lock().await);
    }

    // ---------------------------------------------------------------------
    // Local edits
    // ---------------------------------------------------------------------

    /// Create or edit an event. A new id is generated when `id` is `None`.
    pub async fn upsert_event(
        &self,
        id: Option<EventId>,
        fields: EventFields,
    ) -> Result<CalendarEvent, SyncError> {
        let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let event = CalendarEvent::new(id, fields, now_millis());
        let stored = self.mutate(move |store| store.upsert(event)).await?;
        tracing::debug!(local_id = %stored.id, revision = stored.revision, "Event saved");
        Ok(stored)
    }

    /// Tombstone an event; the next pass deletes it remotely.
    pub async fn delete_event(&self, id: &str) -> Result<CalendarEvent, SyncError> {
        let id = id.to_string();
        let now = now_millis();
        let deleted = self.mutate(move |store| store.delete(&id, now)).await?;
        tracing::debug!(local_id = %deleted.id, "Event deleted");
        Ok(deleted)
    }

    /// Active events in id order.
    pub async fn events(&self) -> Result<Vec<CalendarEvent>, SyncError> {
        let store = self.store.lock().await;
        Ok(store.all()?.into_iter().filter(|e| e.is_active()).collect())
    }

    /// An event by id, tombstones included.
    pub async fn event(&self, id: &str) -> Result<Option<CalendarEvent>, SyncError> {
        Ok(self.store.lock().await.get(id)?)
    }

    pub async fn link_for(&self, id: &str) -> Result<Option<EventLink>, SyncError> {
        Ok(self.store.lock().await.link_for(id)?)
    }

    pub async fn links(&self) -> Result<LinkTable, SyncError> {
        Ok(self.store.lock().await.links()?)
    }

    pub async fn checkpoint(&self) -> Result<SyncCheckpoint, SyncError> {
        Ok(self.store.lock().await.checkpoint()?)
    }

    // ---------------------------------------------------------------------
    // Persistence
    // ---------------------------------------------------------------------

    async fn commit(&self, batch: ChangeBatch) -> Result<(), SyncError> {
        if batch.is_empty() {
            return Ok(());
        }
        let ops = batch.len();
        self.mutate(move |store| store.commit(batch)).await?;
        tracing::debug!(ops, "Batch committed");
        Ok(())
    }

    /// Commit the writes of a pass and persist them.
    ///
    /// Local writes whose event was edited since the pass read it are
    /// dropped; `checkpoint` only advances when none were. If persisting
    /// fails the store is rolled back, except for `remote_links`. Returns
    /// the ids of the dropped events.
    async fn commit_pass(
        &self,
        mut batch: ChangeBatch,
        remote_links: Vec<EventLink>,
        checkpoint: Option<SyncCheckpoint>,
    ) -> Result<Vec<EventId>, SyncError> {
        let mut store = self.store.lock().await;
        let stale = batch.drop_stale(&*store)?;
        for link in &remote_links {
            batch.link(link.clone());
        }
        if stale.is_empty() {
            if let Some(checkpoint) = checkpoint {
                batch.advance_checkpoint(checkpoint);
            }
        }
        if batch.is_empty() {
            return Ok(stale);
        }

        let before = store.export_state()?;
        let ops = batch.len();
        store.commit(batch)?;

        let snapshot = store.export_state()?;
        if let Err(e) = self.repository.save(&snapshot).await {
            tracing::error!(error = %e, "Failed to persist pass, rolling back local writes");
            store.import_state(before)?;
            // The provider already holds these writes
            for link in remote_links {
                store.set_link(link)?;
            }
            return Err(e.into());
        }
        tracing::debug!(ops, stale = stale.len(), "Pass committed");
        Ok(stale)
    }

    /// Run a store mutation and persist the result. If persisting fails the
    /// store is rolled back to its previous state.
    async fn mutate<T, F>(&self, f: F) -> Result<T, SyncError>
    where
        F: FnOnce(&mut MemoryStore) -> calsync_engine::error::Result<T> + Send,
        T: Send,
    {
        let mut store = self.store.lock().await;
        let before = store.export_state()?;
        let value = f(&mut *store)?;

        let snapshot = store.export_state()?;
        if let Err(e) = self.repository.save(&snapshot).await {
            tracing::error!(error = %e, "Failed to persist state, rolling back");
            store.import_state(before)?;
            return Err(e.into());
        }
        Ok(value)
    }
}

/// Local side of an incremental pass: events changed since the last sync,
/// the counterparts of linked remote changes and unlinked events sharing an
/// id with a remote change.
fn incremental_candidates(
    store: &MemoryStore,
    since: Option<Timestamp>,
    remote: &RemoteSet,
) -> calsync_engine::error::Result<Vec<CalendarEvent>> {
    let mut candidates: BTreeMap<EventId, CalendarEvent> = store
        .list_changed_since(since)?
        .into_iter()
        .map(|e| (e.id.clone(), e))
        .collect();

    if let RemoteSet::Delta(changes) = remote {
        for change in changes {
            let remote_id = change.remote_id();
            let local_id = match store.link_for_remote(remote_id)? {
                Some(link) => link.local_id,
                None => remote_id.clone(),
            };
            if candidates.contains_key(&local_id) {
                continue;
            }
            if let Some(event) = store.get(&local_id)? {
                candidates.insert(local_id, event);
            }
        }
    }

    Ok(candidates.into_values().collect())
}
