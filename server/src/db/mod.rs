//! Durable state for the event store.
//!
//! The orchestrator keeps the event store in memory and persists a full
//! [`StoreSnapshot`] through a [`StateRepository`] after every commit.

mod file;
mod memory;
mod pool;
mod postgres;

pub use file::FileRepository;
pub use memory::MemoryRepository;
pub use pool::*;
pub use postgres::PgRepository;

use async_trait::async_trait;
use calsync_engine::StoreSnapshot;

/// Persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid stored state: {0}")]
    InvalidState(#[from] calsync_engine::Error),

    #[error("Repository unavailable: {0}")]
    Unavailable(String),
}

/// Load and save the whole store state.
#[async_trait]
pub trait StateRepository: Send + Sync {
    /// The last saved state, or `None` if nothing was saved yet.
    async fn load(&self) -> Result<Option<StoreSnapshot>, RepositoryError>;

    /// Replace the saved state. Either the whole snapshot is saved or nothing.
    async fn save(&self, snapshot: &StoreSnapshot) -> Result<(), RepositoryError>;
}
