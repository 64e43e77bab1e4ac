//! Error types for modbump-state

use thiserror::Error;

/// Errors that can occur while reading or writing a state snapshot
#[derive(Error, Debug)]
pub enum StateError {
    /// Local filesystem failure
    #[error("snapshot io failed: {0}")]
    Io(#[from] std::io::Error),

    /// Transport failure talking to a remote backend
    #[error("snapshot transport failed: {0}")]
    Http(String),

    /// The backend answered but refused the operation
    #[error("snapshot backend {backend} rejected {operation}: {detail}")]
    Backend {
        backend: String,
        operation: &'static str,
        detail: String,
    },
}

/// Result type for snapshot backend operations
pub type StateResult<T> = std::result::Result<T, StateError>;
