//! Trigger runtime adapters for the detectors and the OTP sweep

use crate::{
    detectors::Detectors,
    ledger::FlagOutcome,
    otp::OtpService,
    types::{AccountId, LocationSample, RideRecord},
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use trigger_bus::{ScheduledJob, TriggerEvent, TriggerHandler, TriggerKind, TriggerRuntime};

/// Ride documents
pub const RIDES_PATTERN: &str = "rides/{rideId}";
/// Attempt counter of a ride code
pub const OTP_ATTEMPTS_PATTERN: &str = "ride_otps/{rideId}/attempts";
/// Device-id set of an account
pub const DEVICE_IDS_PATTERN: &str = "users/{uid}/deviceIds";
/// Latest location of an account
pub const LOCATIONS_PATTERN: &str = "locations/{uid}";

/// Register every detector with `runtime`
pub fn register_detectors(
    runtime: &mut TriggerRuntime,
    detectors: Arc<Detectors>,
) -> trigger_bus::Result<()> {
    runtime
        .register(
            RIDES_PATTERN,
            TriggerKind::OnUpdate,
            Arc::new(RideCancellationTrigger::new(detectors.clone())),
        )?
        .register(
            OTP_ATTEMPTS_PATTERN,
            TriggerKind::OnWrite,
            Arc::new(OtpAttemptsTrigger::new(detectors.clone())),
        )?
        .register(
            DEVICE_IDS_PATTERN,
            TriggerKind::OnWrite,
            Arc::new(DeviceChurnTrigger::new(detectors.clone())),
        )?
        .register(
            LOCATIONS_PATTERN,
            TriggerKind::OnWrite,
            Arc::new(LocationTrigger::new(detectors)),
        )?;
    Ok(())
}

fn report(event: &TriggerEvent, outcome: Option<FlagOutcome>) {
    match outcome {
        Some(outcome) => debug!(
            path = %event.path,
            account = %outcome.account,
            reason = outcome.reason.as_str(),
            score = outcome.score,
            "Detector flagged account"
        ),
        None => debug!(path = %event.path, "Detector found nothing"),
    }
}

/// Cancellation burst on `rides/{rideId}` updates
pub struct RideCancellationTrigger {
    detectors: Arc<Detectors>,
}

impl RideCancellationTrigger {
    /// Create the trigger
    pub fn new(detectors: Arc<Detectors>) -> Self {
        Self { detectors }
    }
}

#[async_trait]
impl TriggerHandler for RideCancellationTrigger {
    async fn handle(&self, event: TriggerEvent) -> anyhow::Result<()> {
        let before = event.before_as::<RideRecord>()?;
        let after = event.after_as::<RideRecord>()?;

        let outcome = self
            .detectors
            .on_ride_updated(before.as_ref(), after.as_ref(), event.timestamp)
            .await?;
        report(&event, outcome);
        Ok(())
    }
}

/// OTP failure burst on `ride_otps/{rideId}/attempts` writes
pub struct OtpAttemptsTrigger {
    detectors: Arc<Detectors>,
}

impl OtpAttemptsTrigger {
    /// Create the trigger
    pub fn new(detectors: Arc<Detectors>) -> Self {
        Self { detectors }
    }
}

#[async_trait]
impl TriggerHandler for OtpAttemptsTrigger {
    async fn handle(&self, event: TriggerEvent) -> anyhow::Result<()> {
        let Some(subject) = event.param("rideId") else {
            return Ok(());
        };
        let attempts = event.after.as_ref().and_then(Value::as_u64).unwrap_or(0);

        let outcome = self
            .detectors
            .on_otp_attempts(subject, attempts, event.timestamp)
            .await?;
        report(&event, outcome);
        Ok(())
    }
}

/// Device churn on `users/{uid}/deviceIds` writes
pub struct DeviceChurnTrigger {
    detectors: Arc<Detectors>,
}

impl DeviceChurnTrigger {
    /// Create the trigger
    pub fn new(detectors: Arc<Detectors>) -> Self {
        Self { detectors }
    }
}

#[async_trait]
impl TriggerHandler for DeviceChurnTrigger {
    async fn handle(&self, event: TriggerEvent) -> anyhow::Result<()> {
        let Some(uid) = event.param("uid") else {
            return Ok(());
        };

        let outcome = self
            .detectors
            .on_devices_changed(&AccountId::new(uid), event.after.as_ref(), event.timestamp)
            .await?;
        report(&event, outcome);
        Ok(())
    }
}

/// Impossible speed on `locations/{uid}` writes
pub struct LocationTrigger {
    detectors: Arc<Detectors>,
}

impl LocationTrigger {
    /// Create the trigger
    pub fn new(detectors: Arc<Detectors>) -> Self {
        Self { detectors }
    }
}

#[async_trait]
impl TriggerHandler for LocationTrigger {
    async fn handle(&self, event: TriggerEvent) -> anyhow::Result<()> {
        let Some(uid) = event.param("uid") else {
            return Ok(());
        };
        let Some(sample) = event
            .after
            .as_ref()
            .and_then(|value| parse_location(value, event.timestamp))
        else {
            debug!(path = %event.path, "Unusable location report");
            return Ok(());
        };

        let outcome = self
            .detectors
            .on_location(&AccountId::new(uid), sample, event.timestamp)
            .await?;
        report(&event, outcome);
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Numeric {
    Number(f64),
    Text(String),
}

impl Numeric {
    fn value(&self) -> Option<f64> {
        let v = match self {
            Numeric::Number(n) => *n,
            Numeric::Text(s) => s.trim().parse().ok()?,
        };
        v.is_finite().then_some(v)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Timestamp {
    Millis(i64),
    Text(String),
}

impl Timestamp {
    fn value(&self) -> Option<DateTime<Utc>> {
        match self {
            Timestamp::Millis(ms) => Utc.timestamp_millis_opt(*ms).single(),
            Timestamp::Text(s) => DateTime::parse_from_rfc3339(s.trim())
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    let ms = s.trim().parse::<i64>().ok()?;
                    Utc.timestamp_millis_opt(ms).single()
                }),
        }
    }
}

#[derive(Deserialize)]
struct RawLocation {
    lat: Numeric,
    lng: Numeric,
    #[serde(default)]
    ts: Option<Timestamp>,
}

/// Read a location report.
///
/// Coordinates may be numbers or numeric strings; `ts` may be epoch
/// milliseconds or RFC 3339 and defaults to `received_at`. A present but
/// unreadable `ts` makes the report unusable.
pub fn parse_location(value: &Value, received_at: DateTime<Utc>) -> Option<LocationSample> {
    let raw = RawLocation::deserialize(value).ok()?;
    let ts = match &raw.ts {
        Some(ts) => ts.value()?,
        None => received_at,
    };
    Some(LocationSample::new(raw.lat.value()?, raw.lng.value()?, ts))
}

/// Scheduled removal of expired one-time codes
pub struct OtpSweepJob {
    otp: Arc<OtpService>,
}

impl OtpSweepJob {
    /// Create the job
    pub fn new(otp: Arc<OtpService>) -> Self {
        Self { otp }
    }
}

#[async_trait]
impl ScheduledJob for OtpSweepJob {
    async fn run(&self, now: DateTime<Utc>) -> anyhow::Result<()> {
        self.otp.sweep_expired(now).await?;
        Ok(())
    }
}
