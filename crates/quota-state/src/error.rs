//! Error types for the snapshot store.

use thiserror::Error;

/// Result type alias for snapshot store operations.
pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot open snapshot store: {0}")]
    Open(String),

    /// A redb transaction, table, or row operation failed.
    #[error("snapshot store {op} failed: {reason}")]
    Storage { op: &'static str, reason: String },

    #[error("cannot encode snapshot for pool {pool}: {reason}")]
    Encode { pool: String, reason: String },

    /// The stored row exists but does not decode as a `PoolSnapshot`.
    #[error("stored snapshot for pool {pool} is unreadable: {reason}")]
    Decode { pool: String, reason: String },
}
