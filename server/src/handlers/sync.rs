//! Sync and resolution requests.

use calsync_engine::{EventId, Resolution};
use serde::{Deserialize, Serialize};

use crate::sync::{ResolutionReport, SyncError, SyncMode, SyncOrchestrator, SyncReport};

/// Request to resolve a conflict.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRequest {
    pub resolution: Resolution,
}

/// Response to a cancellation request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    /// Whether a running pass was asked to stop
    pub cancelled: bool,
}

/// Run one pass of the requested kind.
pub async fn handle_sync(
    orchestrator: &SyncOrchestrator,
    mode: SyncMode,
) -> Result<SyncReport, SyncError> {
    tracing::debug!(mode = ?mode, "Sync requested");
    match mode {
        SyncMode::Full => orchestrator.perform_full_sync().await,
        SyncMode::Incremental => orchestrator.perform_incremental_sync().await,
    }
}

pub async fn handle_resolve(
    orchestrator: &SyncOrchestrator,
    local_id: &EventId,
    request: ResolveRequest,
) -> Result<ResolutionReport, SyncError> {
    tracing::debug!(local_id = %local_id, resolution = ?request.resolution, "Resolution requested");
    orchestrator
        .resolve_conflict(local_id, request.resolution)
        .await
}
