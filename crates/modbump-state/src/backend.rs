//! Snapshot backend trait.
//!
//! A backend stores exactly one opaque snapshot document. Encoding is the
//! caller's concern; backends only move bytes.

use async_trait::async_trait;

use crate::error::StateResult;

/// Byte-level storage for the persisted repository snapshot.
///
/// Guarantees:
/// - `read()` returns `Ok(None)` when no snapshot has ever been written.
/// - `read()` after a successful `write(data)` returns exactly `data`.
/// - A failed `write` leaves the previous snapshot readable.
#[async_trait]
pub trait SnapshotBackend: Send + Sync {
    /// Short human-readable location, used in logs.
    fn describe(&self) -> String;

    /// Read the current snapshot, if any.
    async fn read(&self) -> StateResult<Option<Vec<u8>>>;

    /// Replace the current snapshot with `data`.
    async fn write(&self, data: &[u8]) -> StateResult<()>;
}
