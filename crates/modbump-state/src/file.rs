use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::backend::SnapshotBackend;
use crate::error::StateResult;

/// Default snapshot filename when none is configured.
pub const DEFAULT_SNAPSHOT_FILENAME: &str = "modbump-state.json";

/// Settings for [`FileBackend`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileBackendConfig {
    #[serde(default = "default_filename")]
    pub filename: PathBuf,
}

fn default_filename() -> PathBuf {
    PathBuf::from(DEFAULT_SNAPSHOT_FILENAME)
}

impl Default for FileBackendConfig {
    fn default() -> Self {
        Self {
            filename: default_filename(),
        }
    }
}

/// Snapshot stored in a single local file.
///
/// Writes go to a temp file in the same directory and are renamed into place,
/// so a crash mid-write never truncates the previous snapshot.
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn from_config(config: &FileBackendConfig) -> Self {
        Self::new(&config.filename)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_atomic(path: &Path, data: &[u8]) -> StateResult<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }

        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotBackend for FileBackend {
    fn describe(&self) -> String {
        format!("file://{}", self.path.display())
    }

    async fn read(&self) -> StateResult<Option<Vec<u8>>> {
        match tokio::fs::read(&self.path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no snapshot file yet");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, data: &[u8]) -> StateResult<()> {
        let path = self.path.clone();
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || Self::write_atomic(&path, &data))
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))??;
        Ok(())
    }
}
