//! JSON file repository.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use calsync_engine::StoreSnapshot;

use super::{RepositoryError, StateRepository};

/// [`StateRepository`] keeping the snapshot in one JSON file.
///
/// Writes go to a sibling temp file that is then renamed over the target, so
/// a crash never leaves a half-written snapshot behind.
#[derive(Debug, Clone)]
pub struct FileRepository {
    path: PathBuf,
}

impl FileRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl StateRepository for FileRepository {
    async fn load(&self) -> Result<Option<StoreSnapshot>, RepositoryError> {
        let json = match tokio::fs::read_to_string(&self.path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let snapshot = StoreSnapshot::from_json(&json)?;
        tracing::debug!(path = %self.path.display(), events = snapshot.event_count(), "Loaded state file");
        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &StoreSnapshot) -> Result<(), RepositoryError> {
        let json = snapshot.to_json_pretty()?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, json).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        Ok(())
    }
}
