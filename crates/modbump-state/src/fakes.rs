//! In-memory snapshot backend (testing only)

use std::sync::Mutex;

use async_trait::async_trait;

use crate::backend::SnapshotBackend;
use crate::error::{StateError, StateResult};

/// Snapshot held in memory. Can be told to fail writes to exercise
/// persistence-failure paths.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    snapshot: Mutex<Option<Vec<u8>>>,
    fail_writes: bool,
    writes: Mutex<usize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend pre-seeded with a snapshot.
    pub fn with_snapshot(data: &[u8]) -> Self {
        Self {
            snapshot: Mutex::new(Some(data.to_vec())),
            ..Self::default()
        }
    }

    /// Backend whose every `write` fails.
    pub fn failing_writes() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    /// Current snapshot bytes, if any.
    pub fn snapshot(&self) -> Option<Vec<u8>> {
        self.snapshot.lock().unwrap().clone()
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        *self.writes.lock().unwrap()
    }
}

#[async_trait]
impl SnapshotBackend for MemoryBackend {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn read(&self) -> StateResult<Option<Vec<u8>>> {
        Ok(self.snapshot.lock().unwrap().clone())
    }

    async fn write(&self, data: &[u8]) -> StateResult<()> {
        if self.fail_writes {
            return Err(StateError::Backend {
                backend: self.describe(),
                operation: "write",
                detail: "writes disabled".to_string(),
            });
        }
        *self.snapshot.lock().unwrap() = Some(data.to_vec());
        *self.writes.lock().unwrap() += 1;
        Ok(())
    }
}
