//! Error types for lock-coordinator operations.

use thiserror::Error;

/// Result type alias for coordinator operations.
pub type Result<T> = std::result::Result<T, LockError>;

/// Errors surfaced by the lock coordinator.
///
/// "Did not acquire" is never an error: contended acquisitions return an
/// unacquired lease. Only programming errors, cancellation, exhausted
/// conflict retries, and unexpected backend failures surface here.
#[derive(Debug, Error)]
pub enum LockError {
    /// A null, empty, or malformed argument was provided.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the offending argument.
        message: String,
    },

    /// A duration argument was outside its valid range.
    #[error("out of range: {message}")]
    OutOfRange {
        /// Description of the offending value.
        message: String,
    },

    /// The caller's token, the shutdown token, or a linked token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// A version-tag conflict persisted past the retry budget.
    #[error("version conflict: {message}")]
    Conflict {
        /// Description of the conflicting update.
        message: String,
    },

    /// A storage collaborator failed. Not retried.
    #[error(transparent)]
    Storage(palisade_core::Error),
}

impl LockError {
    /// Creates a new invalid-argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a new out-of-range error.
    #[must_use]
    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::OutOfRange {
            message: message.into(),
        }
    }
}

impl From<palisade_core::Error> for LockError {
    fn from(error: palisade_core::Error) -> Self {
        match error {
            // Storage-layer cancellations surface as coordinator cancellation,
            // whatever wrapper the backend reported them in.
            palisade_core::Error::Cancelled => Self::Cancelled,
            other => Self::Storage(other),
        }
    }
}
