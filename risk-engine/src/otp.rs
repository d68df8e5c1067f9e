//! One-time ride codes: issuance, verification and expiry
//!
//! Codes are never stored in clear. The record keeps `HMAC-SHA256(secret,
//! "code|subject")` as hex, and verification recomputes the MAC and compares
//! in constant time.
//!
//! Verification checks, in order: record exists, not used, not expired,
//! attempts left, code matches. A caller who has exhausted the attempts is
//! refused and flagged even when the submitted code is right.

use crate::{
    collaborators::{best_effort, Notifier, SideEffect, SmsSender},
    issuer::BackoffIssuer,
    ledger::RiskLedger,
    metrics::{OTP_ISSUANCE_TOTAL, OTP_VERIFICATION_TOTAL},
    paths,
    types::{AccountId, FlagReason, OtpRecord, RideRecord},
    Error, Result,
};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use store_core::{Store, StoreExt};
use tracing::{debug, info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Audit log of successful verifications
pub const OTP_LOGS: &str = "ride_otp_logs";

/// Ride status set once the code is verified
pub const RIDE_ACTIVE: &str = "active";

/// OTP configuration
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OtpConfig {
    /// Code lifetime in milliseconds (default: 5 minutes)
    pub expiry_ms: u64,

    /// Failed attempts allowed before the code is refused
    pub max_attempts: u32,

    /// MAC key for stored code hashes
    pub hmac_secret: String,

    /// Interval of the expiry sweep
    pub sweep_interval_secs: u64,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            expiry_ms: 5 * 60 * 1000,
            max_attempts: 3,
            hmac_secret: String::new(),
            sweep_interval_secs: 60,
        }
    }
}

impl OtpConfig {
    /// Code lifetime
    pub fn expiry(&self) -> Duration {
        Duration::milliseconds(i64::try_from(self.expiry_ms).unwrap_or(i64::MAX))
    }

    /// Sweep interval
    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }
}

impl std::fmt::Debug for OtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtpConfig")
            .field("expiry_ms", &self.expiry_ms)
            .field("max_attempts", &self.max_attempts)
            .field("hmac_secret", &"<redacted>")
            .field("sweep_interval_secs", &self.sweep_interval_secs)
            .finish()
    }
}

/// Result of a successful issuance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedOtp {
    /// Subject the code unlocks
    pub subject: String,
    /// Code with all but the last two digits hidden
    pub masked: String,
    /// Expiry time
    pub expires_at: DateTime<Utc>,
    /// Push delivery to the recipient
    pub notification: SideEffect,
    /// SMS delivery to the recipient
    pub sms: SideEffect,
}

/// Result of a successful verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedOtp {
    /// Subject the code unlocked
    pub subject: String,
    /// Account the code was delivered to
    pub recipient: AccountId,
    /// Account that presented the code
    pub verified_by: AccountId,
    /// Verification time
    pub verified_at: DateTime<Utc>,
}

/// Issues and verifies one-time codes
pub struct OtpService {
    store: Arc<dyn Store>,
    issuer: Arc<BackoffIssuer>,
    ledger: Arc<RiskLedger>,
    notifier: Arc<dyn Notifier>,
    sms: Arc<dyn SmsSender>,
    config: OtpConfig,
    side_effect_timeout: std::time::Duration,
}

impl OtpService {
    /// Create a service
    pub fn new(
        store: Arc<dyn Store>,
        issuer: Arc<BackoffIssuer>,
        ledger: Arc<RiskLedger>,
        notifier: Arc<dyn Notifier>,
        sms: Arc<dyn SmsSender>,
        config: OtpConfig,
        side_effect_timeout: std::time::Duration,
    ) -> Self {
        Self {
            store,
            issuer,
            ledger,
            notifier,
            sms,
            config,
            side_effect_timeout,
        }
    }

    /// Active configuration
    pub fn config(&self) -> &OtpConfig {
        &self.config
    }

    /// Issue a code for a ride, delivered to the ride's rider
    pub async fn issue_for_ride(
        &self,
        issuer: &AccountId,
        ride_id: &str,
        now: DateTime<Utc>,
    ) -> Result<IssuedOtp> {
        let ride: RideRecord = self
            .store
            .get_as(&paths::ride(ride_id))
            .await?
            .ok_or_else(|| Error::RideNotFound(ride_id.to_string()))?;
        let rider = ride
            .rider()
            .cloned()
            .ok_or_else(|| Error::RideNotFound(format!("{} has no rider", ride_id)))?;

        self.issue(issuer, ride_id, &rider, now).await
    }

    /// Issue a code for `subject` and deliver it to `recipient`.
    ///
    /// Rate limited per issuer. Any earlier code for the subject is replaced.
    pub async fn issue(
        &self,
        issuer: &AccountId,
        subject: &str,
        recipient: &AccountId,
        now: DateTime<Utc>,
    ) -> Result<IssuedOtp> {
        if let Err(e) = self.issuer.acquire(issuer, now).await {
            let status = if matches!(e, Error::RateLimited { .. }) {
                "rate_limited"
            } else {
                "error"
            };
            OTP_ISSUANCE_TOTAL.with_label_values(&[status]).inc();
            return Err(e);
        }

        let code = generate_code();
        let expires_at = now
            .checked_add_signed(self.config.expiry())
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let record = OtpRecord {
            hash: self.hash(&code, subject)?,
            issuer_id: issuer.clone(),
            recipient_id: recipient.clone(),
            issued_at: now,
            expires_at,
            used: false,
            attempts: 0,
            expired: false,
            used_by: None,
            used_at: None,
        };
        self.store.set_as(&paths::otp(subject), &record).await?;

        let data = HashMap::from([("rideId".to_string(), subject.to_string())]);
        let notification = best_effort(
            "push",
            self.side_effect_timeout,
            self.notifier.send_to_account(
                recipient,
                "Driver OTP",
                "Your driver has arrived. Open the app to see the OTP.",
                data,
            ),
        )
        .await;

        let sms = match self.phone(recipient).await? {
            Some(phone) => {
                let body = format!("Your ride OTP is {}", code);
                best_effort("sms", self.side_effect_timeout, self.sms.send(&phone, &body)).await
            }
            None => SideEffect::NotAttempted,
        };

        OTP_ISSUANCE_TOTAL.with_label_values(&["issued"]).inc();
        info!(subject, issuer = %issuer, recipient = %recipient, "OTP issued");

        Ok(IssuedOtp {
            subject: subject.to_string(),
            masked: mask(&code),
            expires_at,
            notification,
            sms,
        })
    }

    /// Verify `code` for `subject` on behalf of `caller`
    pub async fn verify(
        &self,
        subject: &str,
        code: &str,
        caller: &AccountId,
        now: DateTime<Utc>,
    ) -> Result<VerifiedOtp> {
        let result = self.check(subject, code, caller, now).await;
        let outcome = match &result {
            Ok(_) => "verified",
            Err(Error::OtpNotFound(_)) => "not_found",
            Err(Error::OtpAlreadyUsed(_)) => "already_used",
            Err(Error::OtpExpired(_)) => "expired",
            Err(Error::TooManyAttempts(_)) => "too_many_attempts",
            Err(Error::IncorrectCode(_)) => "incorrect",
            Err(_) => "error",
        };
        OTP_VERIFICATION_TOTAL.with_label_values(&[outcome]).inc();
        debug!(subject, caller = %caller, outcome, "OTP verification");
        result
    }

    async fn check(
        &self,
        subject: &str,
        code: &str,
        caller: &AccountId,
        now: DateTime<Utc>,
    ) -> Result<VerifiedOtp> {
        let path = paths::otp(subject);
        let record: OtpRecord = self
            .store
            .get_as(&path)
            .await?
            .ok_or_else(|| Error::OtpNotFound(subject.to_string()))?;

        if record.used {
            return Err(Error::OtpAlreadyUsed(subject.to_string()));
        }

        if now > record.expires_at {
            self.store
                .update(&path, fields(json!({ "expired": true })))
                .await?;
            return Err(Error::OtpExpired(subject.to_string()));
        }

        if record.attempts >= self.config.max_attempts {
            self.ledger
                .append_flag(&record.recipient_id, FlagReason::OtpMaxAttempts, now)
                .await?;
            warn!(subject, recipient = %record.recipient_id, "OTP attempts exhausted");
            return Err(Error::TooManyAttempts(subject.to_string()));
        }

        if !self.matches(code, subject, &record.hash)? {
            let attempts = self
                .store
                .transact::<u32, _>(&paths::otp_attempts(subject), |current| {
                    current.unwrap_or(0).saturating_add(1)
                })
                .await?;
            debug!(subject, attempts = attempts.after, "Incorrect OTP");
            return Err(Error::IncorrectCode(subject.to_string()));
        }

        self.store
            .update(
                &path,
                fields(json!({ "used": true, "used_by": caller, "used_at": now })),
            )
            .await?;
        self.store
            .update(
                &paths::ride(subject),
                fields(json!({ "status": RIDE_ACTIVE, "started_at": now })),
            )
            .await?;
        self.store
            .push(
                OTP_LOGS,
                json!({ "ride_id": subject, "verified_by": caller, "ts": now }),
            )
            .await?;

        info!(subject, caller = %caller, "OTP verified");
        Ok(VerifiedOtp {
            subject: subject.to_string(),
            recipient: record.recipient_id,
            verified_by: caller.clone(),
            verified_at: now,
        })
    }

    /// Delete code records whose expiry has passed, returning how many
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut removed = 0;
        for (subject, value) in self.store.children(paths::RIDE_OTPS).await? {
            let expires_at = match serde_json::from_value::<OtpRecord>(value) {
                Ok(record) => record.expires_at,
                Err(e) => {
                    debug!(subject = %subject, error = %e, "Skipping malformed OTP record");
                    continue;
                }
            };

            if now > expires_at {
                self.store.remove(&paths::otp(&subject)).await?;
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, "Expired OTPs swept");
        }
        Ok(removed)
    }

    fn mac(&self, code: &str, subject: &str) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.config.hmac_secret.as_bytes())
            .map_err(|e| Error::Crypto(e.to_string()))?;
        mac.update(code.as_bytes());
        mac.update(b"|");
        mac.update(subject.as_bytes());
        Ok(mac)
    }

    fn hash(&self, code: &str, subject: &str) -> Result<String> {
        Ok(hex::encode(self.mac(code, subject)?.finalize().into_bytes()))
    }

    fn matches(&self, code: &str, subject: &str, stored: &str) -> Result<bool> {
        let Ok(expected) = hex::decode(stored) else {
            return Ok(false);
        };
        Ok(self.mac(code.trim(), subject)?.verify_slice(&expected).is_ok())
    }

    async fn phone(&self, account: &AccountId) -> Result<Option<String>> {
        let phone = self.store.get(&paths::phone(account)).await?;
        Ok(phone
            .as_ref()
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
            .map(str::to_string))
    }
}

impl std::fmt::Debug for OtpService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtpService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Six-digit numeric code
fn generate_code() -> String {
    rand::thread_rng().gen_range(100_000..1_000_000).to_string()
}

fn mask(code: &str) -> String {
    let tail = code.len().saturating_sub(2);
    format!("***{}", &code[tail..])
}

fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{CollaboratorResult, LoggingClaims, LoggingNotifier};
    use crate::enforcement::Enforcer;
    use crate::issuer::IssuerConfig;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use store_core::MemoryStore;

    #[derive(Default)]
    struct CapturedSms(Mutex<Vec<String>>);

    impl CapturedSms {
        fn last_code(&self) -> String {
            let sent = self.0.lock();
            let body = sent.last().unwrap();
            body[body.len() - 6..].to_string()
        }
    }

    #[async_trait]
    impl SmsSender for CapturedSms {
        async fn send(&self, _phone: &str, body: &str) -> CollaboratorResult {
            self.0.lock().push(body.to_string());
            Ok(())
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        ledger: Arc<RiskLedger>,
        sms: Arc<CapturedSms>,
        service: OtpService,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let timeout = std::time::Duration::from_secs(1);
        let enforcer = Arc::new(Enforcer::new(
            store.clone(),
            Arc::new(LoggingClaims),
            Arc::new(LoggingNotifier),
            timeout,
        ));
        let ledger = Arc::new(RiskLedger::new(store.clone(), enforcer));
        let issuer = Arc::new(BackoffIssuer::new(store.clone(), IssuerConfig::default()));
        let sms = Arc::new(CapturedSms::default());
        let config = OtpConfig {
            hmac_secret: "test-secret".to_string(),
            ..OtpConfig::default()
        };
        let service = OtpService::new(
            store.clone(),
            issuer,
            ledger.clone(),
            Arc::new(LoggingNotifier),
            sms.clone(),
            config,
            timeout,
        );

        store
            .set("users/c1/phone", json!("+15550100"))
            .await
            .unwrap();
        store
            .set("rides/r1", json!({"status": "accepted", "rider_uid": "c1"}))
            .await
            .unwrap();

        Fixture {
            store,
            ledger,
            sms,
            service,
        }
    }

    fn driver() -> AccountId {
        AccountId::new("d1")
    }

    #[test]
    fn test_mask_and_code_shape() {
        let code = generate_code();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(mask("123456"), "***56");
    }

    #[tokio::test]
    async fn test_issue_stores_hash_only() {
        let f = fixture().await;
        let now = Utc::now();

        let issued = f.service.issue_for_ride(&driver(), "r1", now).await.unwrap();
        assert_eq!(issued.sms, SideEffect::Delivered);
        assert_eq!(issued.notification, SideEffect::Delivered);
        assert_eq!(issued.expires_at, now + Duration::minutes(5));

        let code = f.sms.last_code();
        assert!(issued.masked.ends_with(&code[4..]));

        let record: OtpRecord = f.store.get_as("ride_otps/r1").await.unwrap().unwrap();
        assert_ne!(record.hash, code);
        assert_eq!(record.hash.len(), 64);
        assert_eq!(record.recipient_id, AccountId::new("c1"));
        assert_eq!(record.attempts, 0);
    }

    #[tokio::test]
    async fn test_issue_requires_rider() {
        let f = fixture().await;
        f.store
            .set("rides/r2", json!({"status": "accepted"}))
            .await
            .unwrap();

        let err = f
            .service
            .issue_for_ride(&driver(), "r2", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RideNotFound(_)));
        assert!(matches!(
            f.service.issue_for_ride(&driver(), "missing", Utc::now()).await,
            Err(Error::RideNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_verify_success_starts_ride() {
        let f = fixture().await;
        let now = Utc::now();
        f.service.issue_for_ride(&driver(), "r1", now).await.unwrap();
        let code = f.sms.last_code();

        let verified = f.service.verify("r1", &code, &driver(), now).await.unwrap();
        assert_eq!(verified.recipient, AccountId::new("c1"));

        let record: OtpRecord = f.store.get_as("ride_otps/r1").await.unwrap().unwrap();
        assert!(record.used);
        assert_eq!(record.used_by, Some(driver()));
        assert_eq!(
            f.store.get("rides/r1/status").await.unwrap(),
            Some(json!(RIDE_ACTIVE))
        );
        assert_eq!(f.store.children(OTP_LOGS).await.unwrap().len(), 1);

        assert!(matches!(
            f.service.verify("r1", &code, &driver(), now).await,
            Err(Error::OtpAlreadyUsed(_))
        ));
    }

    #[tokio::test]
    async fn test_verify_wrong_code_counts_attempt() {
        let f = fixture().await;
        let now = Utc::now();
        f.service.issue_for_ride(&driver(), "r1", now).await.unwrap();

        let err = f
            .service
            .verify("r1", "not-a-code", &driver(), now)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IncorrectCode(_)));

        let record: OtpRecord = f.store.get_as("ride_otps/r1").await.unwrap().unwrap();
        assert_eq!(record.attempts, 1);
        assert!(!record.used);
    }

    #[tokio::test]
    async fn test_verify_expired_marks_record() {
        let f = fixture().await;
        let now = Utc::now();
        f.service.issue_for_ride(&driver(), "r1", now).await.unwrap();
        let code = f.sms.last_code();

        let late = now + Duration::minutes(6);
        assert!(matches!(
            f.service.verify("r1", &code, &driver(), late).await,
            Err(Error::OtpExpired(_))
        ));
        let record: OtpRecord = f.store.get_as("ride_otps/r1").await.unwrap().unwrap();
        assert!(record.expired);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_refuse_correct_code_and_flag() {
        let f = fixture().await;
        let now = Utc::now();
        f.service.issue_for_ride(&driver(), "r1", now).await.unwrap();
        let code = f.sms.last_code();
        f.store.set("ride_otps/r1/attempts", json!(3)).await.unwrap();

        let err = f.service.verify("r1", &code, &driver(), now).await.unwrap_err();
        assert!(matches!(err, Error::TooManyAttempts(_)));

        let flags = f.ledger.flags(&AccountId::new("c1")).await.unwrap();
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].reason, FlagReason::OtpMaxAttempts);
        assert_eq!(f.ledger.score(&AccountId::new("c1")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_verify_unknown_subject() {
        let f = fixture().await;
        assert!(matches!(
            f.service.verify("nope", "123456", &driver(), Utc::now()).await,
            Err(Error::OtpNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let f = fixture().await;
        let now = Utc::now();
        f.store
            .set("rides/r2", json!({"status": "accepted", "rider_uid": "c1"}))
            .await
            .unwrap();
        f.service
            .issue_for_ride(&driver(), "r1", now - Duration::minutes(10))
            .await
            .unwrap();
        f.service.issue_for_ride(&driver(), "r2", now).await.unwrap();

        assert_eq!(f.service.sweep_expired(now).await.unwrap(), 1);
        assert_eq!(f.store.get("ride_otps/r1").await.unwrap(), None);
        assert!(f.store.get("ride_otps/r2").await.unwrap().is_some());
    }
}
