//! Error types for the Changebot core
//!
//! This module defines all error types used throughout the crate. Most public
//! surfaces fold these into store state or logs instead of returning them;
//! internal helpers propagate them with `?`.

use thiserror::Error;

/// Result type alias for Changebot operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the Changebot system
#[derive(Error, Debug)]
pub enum Error {
    /// Persisted storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Transport-level HTTP errors (connection refused, timeout, ...)
    #[error("HTTP error: {0}")]
    Http(String),

    /// The server answered with a non-2xx status
    ///
    /// `text` is the canonical reason phrase, which is what ends up in
    /// `StoreState::error`.
    #[error("{text}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Reason phrase for the status
        text: String,
    },

    /// Invalid input (payloads, URLs, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A timestamp was NaN, zero, negative or unparseable
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// An action name that is not in the action table
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// No provider registered for a scope before the wait timed out
    #[error("No changebot provider registered for scope \"{scope}\" within {timeout_ms}ms")]
    NoProvider {
        /// The awaited scope
        scope: String,
        /// The timeout that elapsed
        timeout_ms: u64,
    },

    /// The waiter was cancelled before it settled
    #[error("Wait for scope \"{scope}\" was cancelled")]
    WaitCancelled {
        /// The awaited scope
        scope: String,
    },

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create a status error from a code and its reason phrase
    pub fn status(status: u16, text: impl Into<String>) -> Self {
        Self::Status {
            status,
            text: text.into(),
        }
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create an invalid timestamp error
    pub fn invalid_timestamp(msg: impl Into<String>) -> Self {
        Self::InvalidTimestamp(msg.into())
    }

    /// Create a "no provider" error for a scope
    pub fn no_provider(scope: impl Into<String>, timeout_ms: u64) -> Self {
        Self::NoProvider {
            scope: scope.into(),
            timeout_ms,
        }
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
