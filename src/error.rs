//! Error types for epistemic-core.

use thiserror::Error;

/// Result type alias using epistemic-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during verification operations.
///
/// The four verdicts (Grounded, Unsupported, Contradicted, Unverifiable)
/// are decisions, not errors; they live in [`crate::types::Verdict`].
#[derive(Error, Debug)]
pub enum Error {
    /// Operation exceeded its deadline
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Backend refused the request due to rate limiting
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Backend is unreachable or the circuit is open
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Backend failed for an unclassified reason
    #[error("backend error: {0}")]
    BackendGeneric(String),

    /// Caller supplied input the backend cannot process
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error (unknown backend type, missing collaborator)
    #[error("configuration error: {0}")]
    Config(String),
}

/// Coarse classification used by the error handler and retry helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Timeout,
    RateLimited,
    InvalidInput,
    Generic,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::RateLimited => write!(f, "rate_limited"),
            Self::InvalidInput => write!(f, "invalid_input"),
            Self::Generic => write!(f, "generic"),
        }
    }
}

impl Error {
    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a backend error from an arbitrary failure message.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::BackendGeneric(message.into())
    }

    /// Classify this error for the handler and retry policy.
    pub fn classify(&self) -> ErrorClass {
        match self {
            Self::Timeout { .. } => ErrorClass::Timeout,
            Self::RateLimited(_) => ErrorClass::RateLimited,
            Self::InvalidInput(_) => ErrorClass::InvalidInput,
            Self::BackendUnavailable(_) | Self::BackendGeneric(_) | Self::Config(_) => {
                ErrorClass::Generic
            }
        }
    }

    /// Whether the retry helper should attempt this call again.
    pub fn is_retryable(&self) -> bool {
        self.classify() != ErrorClass::InvalidInput
    }
}
