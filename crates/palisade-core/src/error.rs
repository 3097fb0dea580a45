//! Error types and result aliases shared across Palisade components.
//!
//! These cover the storage seam only: coordinator-level failures (invalid
//! arguments, exhausted conflict retries) are defined by `palisade-lock`.

use std::fmt;

/// The result type used throughout the Palisade storage seam.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in storage collaborator operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A path, blob, or table row was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A precondition for the operation was not met.
    #[error("precondition failed: {message}")]
    PreconditionFailed {
        /// Description of the failed precondition.
        message: String,
    },

    /// The operation was cancelled before it completed.
    ///
    /// Backends that wrap cancellation inside transport-specific errors must
    /// unwrap and report it as this variant so callers can distinguish a
    /// caller-initiated abort from a backend failure.
    #[error("operation cancelled")]
    Cancelled,

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new internal error.
    #[must_use]
    pub fn internal(message: impl fmt::Display) -> Self {
        Self::Internal {
            message: message.to_string(),
        }
    }
}
