//! modbump-state: snapshot persistence for modbump
//!
//! Stores the single document that carries in-flight pull request state
//! between passes.
//!
//! ## Layer 0 - Persistence
//!
//! Backends only move bytes; the repository encoding lives in `modbump-core`.
//!
//! ## Key Components
//!
//! - `SnapshotBackend`: byte-level read/write contract
//! - `FileBackend`: local file with atomic replace
//! - `S3Backend`: single object in an AWS S3 bucket
//! - `fakes::MemoryBackend`: in-memory backend for tests

pub mod backend;
mod error;
pub mod fakes;
pub mod file;
pub mod s3;

pub use backend::SnapshotBackend;
pub use error::{StateError, StateResult};
pub use file::{FileBackend, FileBackendConfig, DEFAULT_SNAPSHOT_FILENAME};
pub use s3::{S3Backend, S3BackendConfig};
