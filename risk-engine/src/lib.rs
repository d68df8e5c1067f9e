//! Risk & enforcement engine for the ride platform
//!
//! Detectors watch behavioural events (ride cancellations, OTP failures,
//! device churn, GPS jumps) and turn them into a per-account risk score.
//! Crossing a score threshold applies graduated enforcement: soft ban, then
//! lock with a credential claim. The same transactional counters and
//! exponential backoff throttle one-time-code issuance per issuer.
//!
//! # Invariants
//!
//! - The score only decreases through an explicit admin reset or adjustment
//! - Every score, quota and attempt increment is a single-key compare-and-swap
//! - Collaborator failures never roll back a committed decision

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod collaborators;
pub mod config;
pub mod detectors;
pub mod enforcement;
pub mod engine;
pub mod error;
pub mod geo;
pub mod handlers;
pub mod issuer;
pub mod ledger;
pub mod metrics;
pub mod otp;
pub mod paths;
pub mod types;
pub mod window;

pub use collaborators::{
    ClaimsClient, CollaboratorError, Collaborators, Notifier, SideEffect, SmsSender,
};
pub use config::Config;
pub use detectors::{Detection, Detectors};
pub use enforcement::{EnforcementOutcome, Enforcer, LiftOutcome};
pub use engine::RiskEngine;
pub use error::{Error, Result};
pub use issuer::{BackoffIssuer, IssuerConfig};
pub use ledger::{AdjustOutcome, FlagOutcome, RiskLedger};
pub use otp::{IssuedOtp, OtpConfig, OtpService, VerifiedOtp};
pub use types::*;
pub use window::WindowedCounter;
