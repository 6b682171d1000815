//! Real-time worker: turns provider push notifications into incremental
//! passes.

use std::sync::Arc;

use calsync_engine::RemoteId;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::{NotifyOutcome, SyncOrchestrator};

/// A provider push notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteNotification {
    /// Event the provider reported, when it says
    #[serde(default)]
    pub remote_id: Option<RemoteId>,
    /// Provider resource state such as `exists` or `sync`
    #[serde(default)]
    pub resource_state: Option<String>,
}

pub type NotificationSender = mpsc::Sender<RemoteNotification>;

/// Consumes notifications one at a time.
pub struct RealtimeWorker {
    orchestrator: Arc<SyncOrchestrator>,
    receiver: mpsc::Receiver<RemoteNotification>,
}

impl RealtimeWorker {
    pub fn new(orchestrator: Arc<SyncOrchestrator>, capacity: usize) -> (NotificationSender, Self) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            sender,
            Self {
                orchestrator,
                receiver,
            },
        )
    }

    /// Run until every sender is dropped.
    pub async fn run(mut self) {
        tracing::info!("Real-time worker started");

        while let Some(notification) = self.receiver.recv().await {
            tracing::debug!(
                remote_id = ?notification.remote_id,
                resource_state = ?notification.resource_state,
                "Remote change notification"
            );

            match self.orchestrator.notify_remote_change().await {
                Ok(NotifyOutcome::Ignored) => {
                    tracing::debug!("Real-time updates disabled, notification ignored");
                }
                Ok(NotifyOutcome::Synced(report)) => {
                    tracing::debug!(actions = report.summary.total(), "Notification synced");
                }
                Ok(NotifyOutcome::Deferred) => self.drain_resync().await,
                Err(e) => tracing::warn!(error = %e, "Notification-triggered sync failed"),
            }
        }

        tracing::info!("Real-time worker stopped");
    }

    /// Wait for the active session, then run the passes it deferred.
    async fn drain_resync(&self) {
        loop {
            self.orchestrator.wait_idle().await;
            if !self.orchestrator.take_resync_request() {
                return;
            }
            match self.orchestrator.perform_incremental_sync().await {
                Ok(_) => {}
                Err(super::SyncError::SyncAlreadyInProgress) => {
                    self.orchestrator.request_resync();
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Deferred sync failed");
                    return;
                }
            }
        }
    }
}
