//! Error types for throttling operations.

use thiserror::Error;

/// Main error type for admission decisions and limiter configuration.
#[derive(Error, Debug)]
pub enum ThrottleError {
    /// A fixed-window quota has no admissions left in the current window
    #[error("quota exceeded")]
    QuotaExceeded,

    /// The admission context was cancelled
    #[error("context cancelled")]
    Cancelled,

    /// The admission context's deadline passed
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// Any other limiter failure
    #[error("Limiter error: {0}")]
    Limiter(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ThrottleError {
    /// Whether this failure is a quota exhaustion rather than a cancellation
    /// or some other error.
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, ThrottleError::QuotaExceeded)
    }

    /// Whether this failure came from the admission context.
    pub fn is_context_error(&self) -> bool {
        matches!(
            self,
            ThrottleError::Cancelled | ThrottleError::DeadlineExceeded
        )
    }
}

/// Result type alias for throttling operations.
pub type Result<T> = std::result::Result<T, ThrottleError>;
