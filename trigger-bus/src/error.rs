//! Error types for the trigger runtime

use std::time::Duration;
use thiserror::Error;

/// Trigger runtime error
#[derive(Debug, Error)]
pub enum Error {
    /// Pattern could not be parsed
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    /// Handler did not finish in time
    #[error("Handler for {pattern} timed out after {timeout:?}")]
    HandlerTimeout {
        /// Pattern the handler was registered for
        pattern: String,
        /// Configured bound
        timeout: Duration,
    },

    /// Handler returned an error
    #[error("Handler for {pattern} failed: {message}")]
    Handler {
        /// Pattern the handler was registered for
        pattern: String,
        /// Rendered error chain
        message: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] store_core::Error),
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
