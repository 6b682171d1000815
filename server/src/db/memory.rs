//! In-process repository with failure injection.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use calsync_engine::StoreSnapshot;
use tokio::sync::Mutex;

use super::{RepositoryError, StateRepository};

#[derive(Debug, Default)]
pub struct MemoryRepository {
    saved: Mutex<Option<StoreSnapshot>>,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with previously saved state.
    pub fn with_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            saved: Mutex::new(Some(snapshot)),
            ..Self::default()
        }
    }

    /// Make every following save fail until reset.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub async fn saved(&self) -> Option<StoreSnapshot> {
        self.saved.lock().await.clone()
    }
}

#[async_trait]
impl StateRepository for MemoryRepository {
    async fn load(&self) -> Result<Option<StoreSnapshot>, RepositoryError> {
        Ok(self.saved.lock().await.clone())
    }

    async fn save(&self, snapshot: &StoreSnapshot) -> Result<(), RepositoryError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("injected save failure".into()));
        }
        *self.saved.lock().await = Some(snapshot.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
