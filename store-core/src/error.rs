//! Error types for the store

use thiserror::Error;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Store errors
#[derive(Error, Debug)]
pub enum Error {
    /// Path is empty or contains forbidden characters
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transaction kept losing the compare-and-swap race
    #[error("Transaction on {path} aborted after {attempts} attempts")]
    TransactionAborted {
        /// Contended path
        path: String,
        /// Attempts made before giving up
        attempts: u32,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Backend error
    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Storage(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Storage(msg.to_string())
    }
}
