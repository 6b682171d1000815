//! In-process calendar provider.
//!
//! Serves deltas from an ordered change log addressed by `seq:N` cursors,
//! versions every write with a fresh ETag and can simulate other clients,
//! network faults, latency and expired cursors.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use calsync_engine::{DeltaCursor, EventFields, RemoteChange, RemoteEvent, RemoteId};
use tokio::sync::Mutex;

use super::{Delta, DeleteOutcome, FullSnapshot, PushChange, PushOutcome, RemoteAdapter, RemoteError};
use crate::now_millis;

/// Provider calls, for counters and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    FetchFull,
    FetchDelta,
    Push,
    Delete,
}

impl Call {
    const ALL: [Call; 4] = [Call::FetchFull, Call::FetchDelta, Call::Push, Call::Delete];

    fn index(self) -> usize {
        match self {
            Call::FetchFull => 0,
            Call::FetchDelta => 1,
            Call::Push => 2,
            Call::Delete => 3,
        }
    }
}

/// Planned network faults for one kind of call.
#[derive(Debug, Clone, Copy)]
struct FaultPlan {
    /// Calls that still succeed before faults start
    succeed: usize,
    /// Calls that fail once faults started
    fail: usize,
}

#[derive(Debug, Default)]
struct Inner {
    events: BTreeMap<RemoteId, RemoteEvent>,
    log: Vec<RemoteChange>,
    /// Cursors below this sequence number are expired
    horizon: usize,
    next_id: u64,
    next_etag: u64,
    faults: HashMap<Call, FaultPlan>,
}

impl Inner {
    fn cursor(&self) -> DeltaCursor {
        DeltaCursor::new(format!("seq:{}", self.log.len()))
    }

    fn fresh_etag(&mut self) -> String {
        self.next_etag += 1;
        format!("etag-{}", self.next_etag)
    }

    fn fresh_id(&mut self) -> RemoteId {
        self.next_id += 1;
        format!("r-{}", self.next_id)
    }

    fn write(&mut self, remote_id: RemoteId, fields: EventFields, last_modified: u64) -> RemoteEvent {
        let etag = self.fresh_etag();
        let event = RemoteEvent::new(remote_id, fields, last_modified, etag);
        self.events.insert(event.remote_id.clone(), event.clone());
        self.log.push(RemoteChange::Upserted(event.clone()));
        event
    }

    fn remove(&mut self, remote_id: &str) -> bool {
        if self.events.remove(remote_id).is_none() {
            return false;
        }
        self.log.push(RemoteChange::Deleted {
            remote_id: remote_id.to_string(),
        });
        true
    }

    /// Consume one slot of the fault plan for `call`.
    fn should_fail(&mut self, call: Call) -> bool {
        let Some(plan) = self.faults.get_mut(&call) else {
            return false;
        };
        if plan.succeed > 0 {
            plan.succeed -= 1;
            return false;
        }
        if plan.fail > 0 {
            plan.fail -= 1;
            return true;
        }
        self.faults.remove(&call);
        false
    }
}

/// In-memory [`RemoteAdapter`].
#[derive(Debug, Default)]
pub struct MemoryCalendar {
    inner: Mutex<Inner>,
    calls: [AtomicUsize; 4],
    latency: Option<Duration>,
}

impl MemoryCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every adapter call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Let `succeed` calls of `call` through, then fail the next `fail` ones
    /// with a network error.
    pub async fn fail_calls(&self, call: Call, succeed: usize, fail: usize) {
        self.inner
            .lock()
            .await
            .faults
            .insert(call, FaultPlan { succeed, fail });
    }

    /// Fail the next `count` calls of `call`.
    pub async fn fail_next(&self, call: Call, count: usize) {
        self.fail_calls(call, 0, count).await;
    }

    /// Invalidate every cursor handed out so far.
    pub async fn expire_cursors(&self) {
        let mut inner = self.inner.lock().await;
        inner.horizon = inner.log.len();
    }

    /// Number of adapter calls of one kind so far.
    pub fn calls(&self, call: Call) -> usize {
        self.calls[call.index()].load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        Call::ALL.iter().map(|call| self.calls(*call)).sum()
    }

    // Changes made by other clients of the provider

    pub async fn create_external(&self, fields: EventFields) -> RemoteEvent {
        let mut inner = self.inner.lock().await;
        let remote_id = inner.fresh_id();
        inner.write(remote_id, fields, now_millis())
    }

    /// Overwrite an event; `None` if it does not exist.
    pub async fn update_external(&self, remote_id: &str, fields: EventFields) -> Option<RemoteEvent> {
        let mut inner = self.inner.lock().await;
        if !inner.events.contains_key(remote_id) {
            return None;
        }
        Some(inner.write(remote_id.to_string(), fields, now_millis()))
    }

    pub async fn delete_external(&self, remote_id: &str) -> bool {
        self.inner.lock().await.remove(remote_id)
    }

    pub async fn get(&self, remote_id: &str) -> Option<RemoteEvent> {
        self.inner.lock().await.events.get(remote_id).cloned()
    }

    pub async fn events(&self) -> Vec<RemoteEvent> {
        self.inner.lock().await.events.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.events.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn enter(&self, call: Call) -> Result<tokio::sync::MutexGuard<'_, Inner>, RemoteError> {
        self.calls[call.index()].fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut inner = self.inner.lock().await;
        if inner.should_fail(call) {
            tracing::debug!(call = ?call, "Injected network failure");
            return Err(RemoteError::Network(format!("injected failure on {:?}", call)));
        }
        Ok(inner)
    }
}

fn parse_cursor(cursor: &DeltaCursor) -> Option<usize> {
    cursor.as_str().strip_prefix("seq:")?.parse().ok()
}

#[async_trait]
impl RemoteAdapter for MemoryCalendar {
    async fn fetch_full(&self) -> Result<FullSnapshot, RemoteError> {
        let inner = self.enter(Call::FetchFull).await?;
        Ok(FullSnapshot {
            events: inner.events.values().cloned().collect(),
            cursor: inner.cursor(),
        })
    }

    async fn fetch_delta(&self, cursor: &DeltaCursor) -> Result<Delta, RemoteError> {
        let inner = self.enter(Call::FetchDelta).await?;
        let position = parse_cursor(cursor)
            .filter(|seq| *seq >= inner.horizon && *seq <= inner.log.len())
            .ok_or(RemoteError::CursorExpired)?;

        Ok(Delta {
            changes: inner.log[position..].to_vec(),
            cursor: inner.cursor(),
        })
    }

    async fn push(&self, change: PushChange) -> Result<PushOutcome, RemoteError> {
        let mut inner = self.enter(Call::Push).await?;

        let Some(remote_id) = change.remote_id else {
            let remote_id = inner.fresh_id();
            let created = inner.write(remote_id, change.fields, change.last_modified);
            return Ok(PushOutcome::Accepted(created));
        };

        let current = inner
            .events
            .get(&remote_id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(remote_id.clone()))?;

        if change.if_match.as_deref() != Some(current.etag.as_str()) {
            return Ok(PushOutcome::Rejected(current));
        }

        let updated = inner.write(remote_id, change.fields, change.last_modified);
        Ok(PushOutcome::Accepted(updated))
    }

    async fn delete(&self, remote_id: &str) -> Result<DeleteOutcome, RemoteError> {
        let mut inner = self.enter(Call::Delete).await?;
        if inner.remove(remote_id) {
            Ok(DeleteOutcome::Deleted)
        } else {
            Ok(DeleteOutcome::NotFound)
        }
    }
}
