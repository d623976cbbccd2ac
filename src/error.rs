//! Structured error handling for the control-plane core.
//!
//! The taxonomy separates failures that must never be retried (validation,
//! fatal) from transient failures that re-enter the retry loop, and keeps
//! lease conflicts as their own class: a conflict is an expected outcome of
//! running multiple instances against shared storage, not an entity failure.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// Bad input or violated precondition. Surfaced to the caller, never retried.
    #[error("validation failure: {0}")]
    Validation(String),

    /// Transient failure. Re-attempted up to the configured retry limit.
    #[error("retryable failure: {0}")]
    Retryable(String),

    /// Irrecoverable by construction. Bypasses the retry budget.
    #[error("fatal failure: {0}")]
    Fatal(String),

    /// Another runner holds the lease. The local attempt is abandoned and
    /// picked up again on a later poll cycle.
    #[error("entity {id} is leased by another runner")]
    LeaseConflict { id: String },

    #[error("entity not found: {0}")]
    NotFound(String),

    #[error("caller is not authorized: {0}")]
    Unauthorized(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    /// The bounded command queue rejected a submission.
    #[error("command queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },
}

pub type Result<T> = std::result::Result<T, CoreError>;
