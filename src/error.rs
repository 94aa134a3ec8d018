//! Error types for the Turnstile engine.

use std::time::Duration;

use thiserror::Error;

/// Main error type for Turnstile operations.
///
/// A denied admission is never an error; `allow` returns `Ok(false)` for that.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// A limit rule with a non-positive limit or window.
    #[error("Invalid rate limit config for pattern '{pattern}': {reason}")]
    InvalidConfig { pattern: String, reason: String },

    /// Configuration file errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal fault in the engine, e.g. a poisoned lock.
    #[error("Internal rate limiter error: {0}")]
    Internal(String),

    /// Raised by collaborators that turn a deny into a failure.
    #[error("Rate limit exceeded for {operation} (retry after {}s)", .retry_after.as_secs())]
    RateLimitExceeded {
        operation: String,
        retry_after: Duration,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TurnstileError {
    pub(crate) fn invalid_config(pattern: &str, reason: impl Into<String>) -> Self {
        TurnstileError::InvalidConfig {
            pattern: pattern.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn poisoned(what: &str) -> Self {
        TurnstileError::Internal(format!("{} lock poisoned", what))
    }
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
