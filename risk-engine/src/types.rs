//! Core types for risk engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque account identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Wrap an identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for AccountId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Why an account was flagged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagReason {
    /// Five or more cancellations within the hour
    ExcessiveCancellations,
    /// Three or more cancellations within the hour
    MultipleCancellations,
    /// Six or more failed OTP attempts
    OtpAttemptsSuspectedFraud,
    /// Three or more failed OTP attempts
    OtpAttemptsWarning,
    /// Verification tried after attempts were exhausted
    OtpMaxAttempts,
    /// Five or more device identifiers
    ManyDevices,
    /// Consecutive locations imply travel above 300 km/h
    ImpossibleSpeed,
}

impl FlagReason {
    /// Stored/label form
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagReason::ExcessiveCancellations => "excessive_cancellations",
            FlagReason::MultipleCancellations => "multiple_cancellations",
            FlagReason::OtpAttemptsSuspectedFraud => "otp_attempts_suspected_fraud",
            FlagReason::OtpAttemptsWarning => "otp_attempts_warning",
            FlagReason::OtpMaxAttempts => "otp_max_attempts",
            FlagReason::ManyDevices => "many_devices",
            FlagReason::ImpossibleSpeed => "impossible_speed",
        }
    }
}

impl fmt::Display for FlagReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one detected anomaly
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flag {
    /// Flagged account
    pub account: AccountId,

    /// Detected reason
    pub reason: FlagReason,

    /// Detection time
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
}

/// Restriction applied to an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementAction {
    /// Reduced privileges
    SoftBan,
    /// Account locked and credential claim attached
    Locked,
}

impl EnforcementAction {
    /// Stored/label form
    pub fn as_str(&self) -> &'static str {
        match self {
            EnforcementAction::SoftBan => "soft_ban",
            EnforcementAction::Locked => "locked",
        }
    }
}

impl fmt::Display for EnforcementAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current enforcement record of an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnforcementRecord {
    /// Applied action
    pub action: EnforcementAction,

    /// Score at the time of the action
    pub score: u64,

    /// When the action was applied
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
}

/// Position of an account in the enforcement state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementState {
    /// No score, no record
    Clear,
    /// Score above zero, no action yet
    Flagged,
    /// Soft ban in force
    SoftBan,
    /// Locked
    Locked,
}

impl EnforcementState {
    /// Derive the state from a score and the current record
    pub fn from_parts(score: u64, record: Option<&EnforcementRecord>) -> Self {
        match record.map(|r| r.action) {
            Some(EnforcementAction::Locked) => EnforcementState::Locked,
            Some(EnforcementAction::SoftBan) => EnforcementState::SoftBan,
            None if score > 0 => EnforcementState::Flagged,
            None => EnforcementState::Clear,
        }
    }
}

/// Point on the globe in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Latitude
    pub lat: f64,
    /// Longitude
    pub lng: f64,
}

impl Coordinate {
    /// Create a coordinate
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Timestamped position report
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    /// Latitude
    pub lat: f64,
    /// Longitude
    pub lng: f64,
    /// Report time
    pub ts: DateTime<Utc>,
}

impl LocationSample {
    /// Create a sample
    pub fn new(lat: f64, lng: f64, ts: DateTime<Utc>) -> Self {
        Self { lat, lng, ts }
    }

    /// Position without the timestamp
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lng)
    }
}

/// Stored one-time code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpRecord {
    /// HMAC of `code|subject`, hex encoded
    pub hash: String,

    /// Account that requested the code
    pub issuer_id: AccountId,

    /// Account the code was delivered to
    pub recipient_id: AccountId,

    /// Issue time
    pub issued_at: DateTime<Utc>,

    /// Expiry time
    pub expires_at: DateTime<Utc>,

    /// Redeemed
    #[serde(default)]
    pub used: bool,

    /// Failed verification attempts
    #[serde(default)]
    pub attempts: u32,

    /// Verification arrived after expiry
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub expired: bool,

    /// Account that redeemed the code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_by: Option<AccountId>,

    /// Redemption time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_at: Option<DateTime<Utc>>,
}

/// Per-issuer generation quota
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceQuota {
    /// Issuances charged in the current window
    pub count_in_current_window: u32,

    /// Start of the current window
    pub window_start: DateTime<Utc>,

    /// Exponent of the current backoff
    pub backoff_level: u32,

    /// Earliest time the issuer may generate again
    #[serde(default)]
    pub next_allowed: Option<DateTime<Utc>>,
}

/// Fields of a ride document the detectors read
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RideRecord {
    /// Lifecycle status (`searching`, `accepted`, `cancelled`, ...)
    #[serde(default)]
    pub status: Option<String>,

    /// Rider account
    #[serde(default)]
    pub rider_uid: Option<AccountId>,

    /// Legacy rider field
    #[serde(default)]
    pub customer_uid: Option<AccountId>,
}

impl RideRecord {
    /// Status value of a cancelled ride
    pub const CANCELLED: &'static str = "cancelled";

    /// Rider, preferring `rider_uid`
    pub fn rider(&self) -> Option<&AccountId> {
        self.rider_uid.as_ref().or(self.customer_uid.as_ref())
    }

    /// True when the status is `cancelled`
    pub fn is_cancelled(&self) -> bool {
        self.status.as_deref() == Some(Self::CANCELLED)
    }
}
