//! Common error types for the payee resolution workspace

use thiserror::Error;

/// Common result type for payee resolution operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the shared configuration and tracing helpers
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file missing, unreadable or malformed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
