//! Error types for risk engine

use std::time::Duration;
use thiserror::Error;

/// Risk engine error
#[derive(Debug, Error)]
pub enum Error {
    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] store_core::Error),

    /// Trigger runtime error
    #[error("Trigger error: {0}")]
    Trigger(#[from] trigger_bus::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Code hashing failed
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Ride missing or has no rider to deliver a code to
    #[error("Ride not found: {0}")]
    RideNotFound(String),

    /// No one-time code exists for the subject
    #[error("OTP not found for {0}")]
    OtpNotFound(String),

    /// Code was already redeemed
    #[error("OTP already used for {0}")]
    OtpAlreadyUsed(String),

    /// Code is past its expiry
    #[error("OTP expired for {0}")]
    OtpExpired(String),

    /// Verification attempts exhausted
    #[error("Too many incorrect attempts for {0}")]
    TooManyAttempts(String),

    /// Code did not match
    #[error("Incorrect OTP for {0}")]
    IncorrectCode(String),

    /// Issuer is backing off
    #[error("OTP generation for {issuer} temporarily blocked, retry after {retry_after:?}")]
    RateLimited {
        /// Throttled issuer
        issuer: String,
        /// Time until the issuer may try again
        retry_after: Duration,
    },
}

impl Error {
    /// Authorization failures reported to the caller of issuance/verification.
    ///
    /// Everything else is an infrastructure failure.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::RideNotFound(_)
                | Error::OtpNotFound(_)
                | Error::OtpAlreadyUsed(_)
                | Error::OtpExpired(_)
                | Error::TooManyAttempts(_)
                | Error::IncorrectCode(_)
                | Error::RateLimited { .. }
        )
    }
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
