//! Error types for payee-resolver
//!
//! Transient errors are retried inside the bulk search client and do not escape
//! it except as `RetriesExhausted`; terminal provider errors surface as a
//! FAILED search. A missing match is a `MatchType::None` value, not an error.

use thiserror::Error;

/// Resolution error taxonomy
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// Network failure, timeout, HTTP 429 or 5xx (retryable)
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// Provider refused a malformed request (not retryable)
    #[error("Provider rejected request (field: {}): {message}", .field.as_deref().unwrap_or("unknown"))]
    ProviderRejected {
        /// Field the provider reported as invalid, when it names one
        field: Option<String>,
        message: String,
    },

    /// Search exceeded its wall-clock ceiling and was abandoned
    #[error("Search {0} timed out")]
    SearchTimedOut(String),

    /// Supplier cache has no snapshot or its lock is poisoned
    #[error("Supplier cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Transient failures persisted past the retry budget
    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    /// Operation not valid for the current search state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// AI type classifier failure
    #[error("Classifier error: {0}")]
    Classifier(String),

    /// Unparseable provider or snapshot payload
    #[error("Parse error: {0}")]
    Parse(String),

    /// Persistence failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// payee-common error
    #[error("Common error: {0}")]
    Common(#[from] payee_common::Error),
}

impl ResolutionError {
    /// Whether the bulk search client may retry the failed operation
    pub fn is_transient(&self) -> bool {
        matches!(self, ResolutionError::TransientNetwork(_))
    }
}

impl From<sqlx::Error> for ResolutionError {
    fn from(err: sqlx::Error) -> Self {
        ResolutionError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for ResolutionError {
    fn from(err: serde_json::Error) -> Self {
        ResolutionError::Parse(err.to_string())
    }
}

/// Result type for resolution operations
pub type ResolutionResult<T> = Result<T, ResolutionError>;
