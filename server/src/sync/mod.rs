//! Sync orchestration: sessions, conflict resolution and real-time updates.

mod error;
mod orchestrator;
mod realtime;

pub use error::SyncError;
pub use orchestrator::{
    NotifyOutcome, ResolutionOutcome, ResolutionReport, SyncMode, SyncOrchestrator, SyncReport,
};
pub use realtime::{NotificationSender, RealtimeWorker, RemoteNotification};
