//! Persisted snapshot of repositories with open pull requests.

use std::sync::Arc;

use async_trait::async_trait;
use modbump_state::SnapshotBackend;
use tracing::{debug, info};

use crate::domain::{BumpError, BumpResult, Repository};

/// Load/save contract the engine uses between passes.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Previously saved repositories; empty when nothing was saved yet.
    async fn load(&self) -> BumpResult<Vec<Repository>>;

    async fn save(&self, repos: &[Repository]) -> BumpResult<()>;
}

/// JSON snapshot on top of any [`SnapshotBackend`].
pub struct SnapshotStore {
    backend: Arc<dyn SnapshotBackend>,
}

impl SnapshotStore {
    pub fn new(backend: Arc<dyn SnapshotBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl StateStore for SnapshotStore {
    async fn load(&self) -> BumpResult<Vec<Repository>> {
        let Some(data) = self.backend.read().await? else {
            debug!(backend = %self.backend.describe(), "no previous state");
            return Ok(Vec::new());
        };

        let repos: Vec<Repository> = serde_json::from_slice(&data).map_err(|e| {
            BumpError::Storage(format!(
                "unable to decode snapshot from {}: {e}",
                self.backend.describe()
            ))
        })?;
        info!(backend = %self.backend.describe(), repos = repos.len(), "loaded state");
        Ok(repos)
    }

    async fn save(&self, repos: &[Repository]) -> BumpResult<()> {
        let data = serde_json::to_vec_pretty(repos)?;
        self.backend.write(&data).await?;
        info!(backend = %self.backend.describe(), repos = repos.len(), "saved state");
        Ok(())
    }
}
