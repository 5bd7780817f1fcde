use thiserror::Error;

use crate::{ExecutionId, Version};

/// Errors that can occur when interacting with the history store.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// The expected version did not match the stream's actual version.
    #[error(
        "Concurrency conflict for execution {execution_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        execution_id: ExecutionId,
        expected: Version,
        actual: Version,
    },

    /// The execution has no history.
    #[error("Execution not found: {0}")]
    ExecutionNotFound(ExecutionId),

    /// The batch handed to `append` was malformed.
    #[error("Invalid append: {0}")]
    InvalidAppend(String),

    /// The backing storage could not be reached.
    #[error("History store unavailable: {0}")]
    Unavailable(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for history store operations.
pub type Result<T> = std::result::Result<T, HistoryError>;
