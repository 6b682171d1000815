//! Sync status state machine and the observable status board.
//!
//! A session moves `Idle → Syncing → {Completed | Failed | ConflictsPending}`.
//! `ConflictsPending` becomes `Completed` once every pending conflict is
//! resolved. `Completed` and `Failed` end the session; the next session
//! starts from `Idle` again.

use crate::{resolve::SyncConflict, Error, Timestamp};
use serde::{Deserialize, Serialize};

/// Status of the current sync session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Completed,
    Failed {
        reason: String,
    },
    ConflictsPending,
}

impl SyncStatus {
    /// `Completed` and `Failed` end a session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncStatus::Completed | SyncStatus::Failed { .. })
    }

    pub fn is_syncing(&self) -> bool {
        matches!(self, SyncStatus::Syncing)
    }

    fn name(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed { .. } => "failed",
            SyncStatus::ConflictsPending => "conflictsPending",
        }
    }

    /// Whether the machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: &SyncStatus) -> bool {
        use SyncStatus::*;
        matches!(
            (self, next),
            (Idle, Syncing)
                | (Syncing, Completed)
                | (Syncing, Failed { .. })
                | (Syncing, ConflictsPending)
                | (ConflictsPending, ConflictsPending)
                | (ConflictsPending, Completed)
                | (ConflictsPending, Failed { .. })
                | (Completed, Idle)
                | (Failed { .. }, Idle)
                | (ConflictsPending, Idle)
        )
    }
}

/// Read-only view of the sync state published to observers.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusBoard {
    pub status: SyncStatus,
    /// Progress of the current session in `[0, 1]`
    pub progress: f64,
    /// End of the last pass that committed a checkpoint
    pub last_sync_time: Option<Timestamp>,
    pub pending_conflicts: Vec<SyncConflict>,
    pub realtime_enabled: bool,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn transition(&mut self, next: SyncStatus) -> Result<(), Error> {
        if !self.status.can_transition_to(&next) {
            return Err(Error::InvalidTransition {
                from: self.status.name(),
                to: next.name(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Start a new session: any previous session is closed through `Idle`,
    /// progress resets to zero and stale conflicts are dropped.
    pub fn begin(&mut self) -> Result<(), Error> {
        if self.status != SyncStatus::Idle {
            self.transition(SyncStatus::Idle)?;
        }
        self.transition(SyncStatus::Syncing)?;
        self.progress = 0.0;
        self.pending_conflicts.clear();
        Ok(())
    }

    /// Raise progress. Values below the current progress are ignored.
    pub fn advance(&mut self, progress: f64) {
        let clamped = progress.clamp(0.0, 1.0);
        if clamped > self.progress {
            self.progress = clamped;
        }
    }

    pub fn complete(&mut self, at: Timestamp) -> Result<(), Error> {
        self.transition(SyncStatus::Completed)?;
        self.advance(1.0);
        self.pending_conflicts.clear();
        self.last_sync_time = Some(at);
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), Error> {
        self.transition(SyncStatus::Failed {
            reason: reason.into(),
        })?;
        self.pending_conflicts.clear();
        Ok(())
    }

    /// Park the session with unresolved conflicts.
    pub fn await_resolution(&mut self, conflicts: Vec<SyncConflict>) -> Result<(), Error> {
        self.transition(SyncStatus::ConflictsPending)?;
        self.advance(1.0);
        self.pending_conflicts = conflicts;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let mut board = StatusBoard::new();
        board.begin().unwrap();
        assert_eq!(board.status, SyncStatus::Syncing);

        board.advance(0.5);
        board.complete(5_000).unwrap();
        assert_eq!(board.status, SyncStatus::Completed);
        assert_eq!(board.progress, 1.0);
        assert_eq!(board.last_sync_time, Some(5_000));
    }

    #[test]
    fn progress_never_decreases() {
        let mut board = StatusBoard::new();
        board.begin().unwrap();
        board.advance(0.6);
        board.advance(0.3);
        assert_eq!(board.progress, 0.6);

        board.advance(7.0);
        assert_eq!(board.progress, 1.0);
    }

    #[test]
    fn new_session_resets_progress() {
        let mut board = StatusBoard::new();
        board.begin().unwrap();
        board.complete(1).unwrap();

        board.begin().unwrap();
        assert_eq!(board.status, SyncStatus::Syncing);
        assert_eq!(board.progress, 0.0);
        assert_eq!(board.last_sync_time, Some(1));
    }

    #[test]
    fn cannot_begin_while_syncing() {
        let mut board = StatusBoard::new();
        board.begin().unwrap();
        assert!(matches!(
            board.begin(),
            Err(Error::InvalidTransition { from: "syncing", .. })
        ));
    }

    #[test]
    fn completion_requires_a_session() {
        let mut board = StatusBoard::new();
        assert!(board.complete(1).is_err());
        assert_eq!(board.status, SyncStatus::Idle);
    }

    #[test]
    fn terminal_states() {
        assert!(SyncStatus::Completed.is_terminal());
        assert!(SyncStatus::Failed {
            reason: "x".into()
        }
        .is_terminal());
        assert!(!SyncStatus::ConflictsPending.is_terminal());
        assert!(!SyncStatus::Idle.is_terminal());
    }

    #[test]
    fn failed_status_serialization() {
        let status = SyncStatus::Failed {
            reason: "network down".into(),
        };
        let json = serde_json::to_string(&status).unwrap();
        assert_eq!(json, r#"{"state":"failed","reason":"network down"}"#);
    }
}
