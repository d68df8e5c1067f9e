//! Anomaly detectors
//!
//! Each detector is split in two: a pure `classify_*` function that maps an
//! observation to at most one [`Detection`], and an async `on_*` method that
//! gathers the observation from the store and hands any detection to the
//! ledger. Tiers are checked highest first; only one fires per invocation.
//!
//! Detectors do not deduplicate by event identity. A trigger delivered twice
//! is counted twice.

use crate::{
    geo,
    ledger::{FlagOutcome, RiskLedger},
    paths,
    types::{AccountId, FlagReason, LocationSample, RideRecord},
    window::WindowedCounter,
    Result,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use store_core::{Store, StoreExt};
use tracing::debug;

/// A flag a detector wants raised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detection {
    /// Reason to record
    pub reason: FlagReason,
    /// Score increment
    pub delta: u64,
}

/// One rung of a detector's escalation ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tier {
    /// Minimum observed count
    pub threshold: u64,
    /// Reason raised
    pub reason: FlagReason,
    /// Score increment
    pub delta: u64,
}

impl Tier {
    const fn new(threshold: u64, reason: FlagReason, delta: u64) -> Self {
        Self {
            threshold,
            reason,
            delta,
        }
    }
}

/// Cancellations within the window, highest first
pub const CANCELLATION_TIERS: [Tier; 2] = [
    Tier::new(5, FlagReason::ExcessiveCancellations, 50),
    Tier::new(3, FlagReason::MultipleCancellations, 20),
];

/// Failed attempts on one code, highest first
pub const OTP_ATTEMPT_TIERS: [Tier; 2] = [
    Tier::new(6, FlagReason::OtpAttemptsSuspectedFraud, 80),
    Tier::new(3, FlagReason::OtpAttemptsWarning, 15),
];

/// Device identifiers on one account
pub const DEVICE_TIERS: [Tier; 1] = [Tier::new(5, FlagReason::ManyDevices, 40)];

/// Fastest plausible travel between two reports
pub const SPEED_LIMIT_KPH: f64 = 300.0;

/// Score increment for implausible travel
pub const IMPOSSIBLE_SPEED_DELTA: u64 = 70;

/// Trailing window for cancellation bursts
pub fn cancellation_window() -> Duration {
    Duration::hours(1)
}

fn classify(tiers: &[Tier], observed: u64) -> Option<Detection> {
    tiers
        .iter()
        .find(|tier| observed >= tier.threshold)
        .map(|tier| Detection {
            reason: tier.reason,
            delta: tier.delta,
        })
}

/// Cancellation burst from the number of recent cancellations
pub fn classify_cancellations(recent: usize) -> Option<Detection> {
    classify(&CANCELLATION_TIERS, recent as u64)
}

/// OTP failure burst from a code's attempt counter
pub fn classify_otp_attempts(attempts: u64) -> Option<Detection> {
    classify(&OTP_ATTEMPT_TIERS, attempts)
}

/// Device churn from the size of the device-id set
pub fn classify_devices(count: usize) -> Option<Detection> {
    classify(&DEVICE_TIERS, count as u64)
}

/// Impossible speed between two consecutive samples.
///
/// Pairs without a positive time delta are skipped.
pub fn classify_movement(previous: &LocationSample, latest: &LocationSample) -> Option<Detection> {
    let speed = geo::speed_kph(previous, latest)?;
    (speed > SPEED_LIMIT_KPH).then_some(Detection {
        reason: FlagReason::ImpossibleSpeed,
        delta: IMPOSSIBLE_SPEED_DELTA,
    })
}

/// Ride moved into `cancelled` with this write
pub fn is_cancellation(before: &RideRecord, after: &RideRecord) -> bool {
    !before.is_cancelled() && after.is_cancelled()
}

/// Size of a stored device-id set.
///
/// Sets are normally objects keyed by device id; arrays are tolerated.
pub fn device_count(devices: Option<&Value>) -> usize {
    match devices {
        Some(Value::Object(map)) => map.len(),
        Some(Value::Array(items)) => items.iter().filter(|v| !v.is_null()).count(),
        _ => 0,
    }
}

/// Store-backed detectors feeding the risk ledger
pub struct Detectors {
    store: Arc<dyn Store>,
    ledger: Arc<RiskLedger>,
    cancellations: WindowedCounter,
}

impl Detectors {
    /// Create detectors over `store`
    pub fn new(store: Arc<dyn Store>, ledger: Arc<RiskLedger>) -> Self {
        let cancellations = WindowedCounter::new(store.clone(), paths::CANCELLATIONS);
        Self {
            store,
            ledger,
            cancellations,
        }
    }

    /// Ledger detections are reported to
    pub fn ledger(&self) -> &Arc<RiskLedger> {
        &self.ledger
    }

    /// Ride document updated
    pub async fn on_ride_updated(
        &self,
        before: Option<&RideRecord>,
        after: Option<&RideRecord>,
        now: DateTime<Utc>,
    ) -> Result<Option<FlagOutcome>> {
        let (Some(before), Some(after)) = (before, after) else {
            return Ok(None);
        };
        if !is_cancellation(before, after) {
            return Ok(None);
        }
        let Some(rider) = after.rider() else {
            debug!("Cancelled ride has no rider");
            return Ok(None);
        };

        self.on_ride_cancelled(rider, now).await
    }

    /// Ride cancelled by `rider` at `now`
    pub async fn on_ride_cancelled(
        &self,
        rider: &AccountId,
        now: DateTime<Utc>,
    ) -> Result<Option<FlagOutcome>> {
        self.cancellations.record(rider.as_str(), now).await?;
        let recent = self
            .cancellations
            .count_recent_and_prune(rider.as_str(), now, cancellation_window())
            .await?;
        debug!(rider = %rider, recent, "Cancellation recorded");

        self.emit(rider, classify_cancellations(recent), now).await
    }

    /// Attempt counter of the code for `subject` written
    pub async fn on_otp_attempts(
        &self,
        subject: &str,
        attempts: u64,
        now: DateTime<Utc>,
    ) -> Result<Option<FlagOutcome>> {
        let Some(detection) = classify_otp_attempts(attempts) else {
            return Ok(None);
        };

        let recipient = self
            .store
            .get(&format!("{}/recipient_id", paths::otp(subject)))
            .await?;
        let Some(recipient) = recipient.as_ref().and_then(Value::as_str).map(AccountId::new) else {
            debug!(subject, "OTP record has no recipient");
            return Ok(None);
        };

        self.emit(&recipient, Some(detection), now).await
    }

    /// Device-id set of `account` written
    pub async fn on_devices_changed(
        &self,
        account: &AccountId,
        devices: Option<&Value>,
        now: DateTime<Utc>,
    ) -> Result<Option<FlagOutcome>> {
        self.emit(account, classify_devices(device_count(devices)), now)
            .await
    }

    /// New location report for `account`
    pub async fn on_location(
        &self,
        account: &AccountId,
        sample: LocationSample,
        now: DateTime<Utc>,
    ) -> Result<Option<FlagOutcome>> {
        let history = paths::location_history(account);
        self.store.push_as(&history, &sample).await?;

        let mut samples: Vec<LocationSample> = self
            .store
            .children(&history)
            .await?
            .into_iter()
            .filter_map(|(_, value)| serde_json::from_value(value).ok())
            .collect();
        samples.sort_by_key(|s| s.ts);

        let [.., previous, latest] = samples.as_slice() else {
            return Ok(None);
        };
        self.emit(account, classify_movement(previous, latest), now)
            .await
    }

    async fn emit(
        &self,
        account: &AccountId,
        detection: Option<Detection>,
        now: DateTime<Utc>,
    ) -> Result<Option<FlagOutcome>> {
        match detection {
            Some(Detection { reason, delta }) => {
                Ok(Some(self.ledger.flag(account, reason, delta, now).await?))
            }
            None => Ok(None),
        }
    }
}

impl std::fmt::Debug for Detectors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Detectors")
            .field("cancellations", &self.cancellations)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{LoggingClaims, LoggingNotifier};
    use crate::enforcement::Enforcer;
    use serde_json::json;
    use store_core::MemoryStore;

    fn detectors() -> (Arc<MemoryStore>, Detectors) {
        let store = Arc::new(MemoryStore::new());
        let enforcer = Arc::new(Enforcer::new(
            store.clone(),
            Arc::new(LoggingClaims),
            Arc::new(LoggingNotifier),
            std::time::Duration::from_secs(1),
        ));
        let ledger = Arc::new(RiskLedger::new(store.clone(), enforcer));
        (store.clone(), Detectors::new(store, ledger))
    }

    fn ride(status: &str) -> RideRecord {
        RideRecord {
            status: Some(status.to_string()),
            rider_uid: Some(AccountId::new("c1")),
            customer_uid: None,
        }
    }

    #[test]
    fn test_tiers_are_exclusive() {
        assert_eq!(classify_cancellations(2), None);
        assert_eq!(
            classify_cancellations(3).map(|d| d.reason),
            Some(FlagReason::MultipleCancellations)
        );
        assert_eq!(
            classify_cancellations(7),
            Some(Detection {
                reason: FlagReason::ExcessiveCancellations,
                delta: 50
            })
        );
        assert_eq!(classify_otp_attempts(5).map(|d| d.delta), Some(15));
        assert_eq!(classify_otp_attempts(6).map(|d| d.delta), Some(80));
        assert_eq!(classify_devices(4), None);
        assert_eq!(classify_devices(5).map(|d| d.delta), Some(40));
    }

    #[test]
    fn test_device_count_shapes() {
        assert_eq!(device_count(None), 0);
        assert_eq!(device_count(Some(&json!({"a": true, "b": true}))), 2);
        assert_eq!(device_count(Some(&json!(["a", null, "c"]))), 2);
        assert_eq!(device_count(Some(&json!("a"))), 0);
    }

    #[test]
    fn test_cancellation_transition() {
        assert!(is_cancellation(&ride("accepted"), &ride("cancelled")));
        assert!(!is_cancellation(&ride("cancelled"), &ride("cancelled")));
        assert!(!is_cancellation(&ride("searching"), &ride("accepted")));
    }

    #[tokio::test]
    async fn test_cancellation_ladder() {
        let (_, detectors) = detectors();
        let rider = AccountId::new("c1");
        let now = Utc::now();

        let mut reasons = Vec::new();
        for i in 0..5 {
            let outcome = detectors
                .on_ride_cancelled(&rider, now + Duration::seconds(i))
                .await
                .unwrap();
            reasons.push(outcome.map(|o| o.reason));
        }

        assert_eq!(
            reasons,
            vec![
                None,
                None,
                Some(FlagReason::MultipleCancellations),
                Some(FlagReason::MultipleCancellations),
                Some(FlagReason::ExcessiveCancellations),
            ]
        );
        assert_eq!(detectors.ledger().score(&rider).await.unwrap(), 90);
    }

    #[tokio::test]
    async fn test_old_cancellations_fall_out_of_window() {
        let (_, detectors) = detectors();
        let rider = AccountId::new("c1");
        let now = Utc::now();

        for _ in 0..2 {
            detectors
                .on_ride_cancelled(&rider, now - Duration::hours(2))
                .await
                .unwrap();
        }
        let outcome = detectors.on_ride_cancelled(&rider, now).await.unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn test_ride_without_rider_is_ignored() {
        let (_, detectors) = detectors();
        let before = RideRecord {
            status: Some("accepted".to_string()),
            ..RideRecord::default()
        };
        let after = RideRecord {
            status: Some("cancelled".to_string()),
            ..RideRecord::default()
        };

        let outcome = detectors
            .on_ride_updated(Some(&before), Some(&after), Utc::now())
            .await
            .unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn test_otp_attempts_resolve_recipient() {
        let (store, detectors) = detectors();
        store
            .set("ride_otps/r1", json!({"recipient_id": "c1", "attempts": 3}))
            .await
            .unwrap();

        let outcome = detectors
            .on_otp_attempts("r1", 3, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.account, AccountId::new("c1"));
        assert_eq!(outcome.reason, FlagReason::OtpAttemptsWarning);

        let missing = detectors.on_otp_attempts("r2", 9, Utc::now()).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_impossible_speed() {
        let (_, detectors) = detectors();
        let account = AccountId::new("d1");
        let t0 = Utc::now();

        let first = detectors
            .on_location(&account, LocationSample::new(0.0, 0.0, t0), t0)
            .await
            .unwrap();
        assert!(first.is_none());

        let t1 = t0 + Duration::seconds(10);
        let second = detectors
            .on_location(&account, LocationSample::new(0.009, 0.0, t1), t1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.reason, FlagReason::ImpossibleSpeed);
        assert_eq!(second.delta, 70);
    }

    #[tokio::test]
    async fn test_same_timestamp_is_skipped() {
        let (_, detectors) = detectors();
        let account = AccountId::new("d1");
        let t0 = Utc::now();

        detectors
            .on_location(&account, LocationSample::new(0.0, 0.0, t0), t0)
            .await
            .unwrap();
        let outcome = detectors
            .on_location(&account, LocationSample::new(10.0, 10.0, t0), t0)
            .await
            .unwrap();
        assert!(outcome.is_none());
    }
}
