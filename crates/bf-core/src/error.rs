//! # ForumError
//!
//! Centralized error handling for the forum crates.
//! Every port and service returns this type so callers can branch on the failure kind.

use thiserror::Error;

/// The primary error type for all forum operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ForumError {
    /// Referenced document is absent (e.g., Thread, Reply)
    #[error("{0} not found with ID {1}")]
    NotFound(String, String),

    /// Input rejected before it reached the store (e.g., empty title)
    #[error("validation error: {0}")]
    Validation(String),

    /// Caller lacks the capability for the operation (e.g., non-admin pinning)
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A conditional write lost a race with another writer; safe to retry
    #[error("conflict: {0}")]
    Conflict(String),

    /// Store or blob infrastructure failure (e.g., DB down, disk full)
    #[error("transient I/O failure: {0}")]
    Transient(String),
}

impl ForumError {
    pub fn thread_not_found(id: impl ToString) -> Self {
        Self::NotFound("Thread".to_string(), id.to_string())
    }

    pub fn reply_not_found(id: impl ToString) -> Self {
        Self::NotFound("Reply".to_string(), id.to_string())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// A specialized Result type for forum logic.
pub type Result<T> = std::result::Result<T, ForumError>;
