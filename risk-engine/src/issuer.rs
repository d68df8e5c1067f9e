//! Backoff-limited issuance quota
//!
//! Each issuer has one quota record. Every attempt charges the record inside a
//! single compare-and-swap transaction; going over the per-window limit raises
//! the backoff level and pushes `next_allowed` out by `2^level` units.
//!
//! Callers go through [`BackoffIssuer::acquire`], which checks the cached
//! record before transacting and re-checks the committed record after. The
//! post-check runs against a record the transaction has already charged, so an
//! attempt can be counted and still rejected.

use crate::{paths, types::AccountId, types::IssuanceQuota, Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use store_core::{Store, StoreExt};
use tracing::{debug, warn};

/// Quota configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IssuerConfig {
    /// Issuances allowed per window before backoff starts
    pub limit_per_window: u32,

    /// Window length in seconds (default: 1 hour)
    pub window_secs: u64,

    /// Backoff base unit in seconds (default: 1 minute)
    pub backoff_unit_secs: u64,

    /// Upper bound on a single backoff delay (default: 30 days)
    pub max_backoff_secs: u64,
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            limit_per_window: 10,
            window_secs: 3600,
            backoff_unit_secs: 60,
            max_backoff_secs: 30 * 24 * 3600,
        }
    }
}

impl IssuerConfig {
    fn window(&self) -> Duration {
        Duration::seconds(clamp_secs(self.window_secs))
    }
}

fn clamp_secs(secs: u64) -> i64 {
    // chrono durations hold at most i64::MAX milliseconds
    i64::try_from(secs).unwrap_or(i64::MAX).min(i64::MAX / 1_000)
}

/// Delay imposed at `level`: `unit * 2^level`, capped
pub fn backoff_delay(level: u32, config: &IssuerConfig) -> Duration {
    let factor = 1u64.checked_shl(level).unwrap_or(u64::MAX);
    let secs = config
        .backoff_unit_secs
        .saturating_mul(factor)
        .min(config.max_backoff_secs);
    Duration::seconds(clamp_secs(secs))
}

/// Quota state after one more attempt at `now`
pub fn advance(
    previous: Option<IssuanceQuota>,
    now: DateTime<Utc>,
    config: &IssuerConfig,
) -> IssuanceQuota {
    let Some(mut quota) = previous else {
        return IssuanceQuota {
            count_in_current_window: 1,
            window_start: now,
            backoff_level: 0,
            next_allowed: None,
        };
    };

    if now - quota.window_start > config.window() {
        return IssuanceQuota {
            count_in_current_window: 1,
            window_start: now,
            backoff_level: quota.backoff_level.saturating_sub(1),
            next_allowed: None,
        };
    }

    quota.count_in_current_window = quota.count_in_current_window.saturating_add(1);
    if quota.count_in_current_window > config.limit_per_window {
        quota.backoff_level = quota.backoff_level.saturating_add(1);
        let delay = backoff_delay(quota.backoff_level, config);
        quota.next_allowed = Some(
            now.checked_add_signed(delay)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        );
    }
    quota
}

/// Reject when `now` is before the quota's `next_allowed`
pub fn check_allowed(issuer: &AccountId, quota: &IssuanceQuota, now: DateTime<Utc>) -> Result<()> {
    match quota.next_allowed {
        Some(next) if now < next => Err(Error::RateLimited {
            issuer: issuer.to_string(),
            retry_after: (next - now).to_std().unwrap_or_default(),
        }),
        _ => Ok(()),
    }
}

/// Per-issuer rate limiter with exponential backoff
pub struct BackoffIssuer {
    store: Arc<dyn Store>,
    config: IssuerConfig,
}

impl BackoffIssuer {
    /// Create an issuer
    pub fn new(store: Arc<dyn Store>, config: IssuerConfig) -> Self {
        Self { store, config }
    }

    /// Active configuration
    pub fn config(&self) -> &IssuerConfig {
        &self.config
    }

    /// Charge one attempt and return the committed quota
    pub async fn try_acquire(&self, issuer: &AccountId, now: DateTime<Utc>) -> Result<IssuanceQuota> {
        let config = &self.config;
        let committed = self
            .store
            .transact(&paths::issuance_quota(issuer), |previous| {
                advance(previous, now, config)
            })
            .await?;

        debug!(
            issuer = %issuer,
            count = committed.after.count_in_current_window,
            backoff_level = committed.after.backoff_level,
            attempts = committed.attempts,
            "Issuance quota charged"
        );
        Ok(committed.after)
    }

    /// Last committed quota, without charging
    pub async fn cached(&self, issuer: &AccountId) -> Result<Option<IssuanceQuota>> {
        Ok(self.store.get_as(&paths::issuance_quota(issuer)).await?)
    }

    /// Full caller contract: pre-check, charge, post-check
    pub async fn acquire(&self, issuer: &AccountId, now: DateTime<Utc>) -> Result<IssuanceQuota> {
        if let Some(cached) = self.cached(issuer).await? {
            check_allowed(issuer, &cached, now)?;
        }

        let quota = self.try_acquire(issuer, now).await?;
        if let Err(e) = check_allowed(issuer, &quota, now) {
            warn!(
                issuer = %issuer,
                backoff_level = quota.backoff_level,
                "Issuance limit exceeded"
            );
            return Err(e);
        }
        Ok(quota)
    }
}

impl std::fmt::Debug for BackoffIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackoffIssuer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
