//! Risk ledger: flags, scores and threshold crossings

use crate::{
    enforcement::{clear_account, EnforcementOutcome, Enforcer},
    metrics::RISK_FLAGS_TOTAL,
    paths,
    types::{AccountId, EnforcementAction, Flag, FlagReason},
    Result,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use store_core::{Store, StoreExt};
use tracing::{debug, info};

/// Enforcement thresholds, highest first.
///
/// Only the first tier reached by the new score is considered, so a jump
/// straight past 200 locks the account without a soft ban on the way.
pub const ENFORCEMENT_TIERS: [(u64, EnforcementAction); 2] = [
    (200, EnforcementAction::Locked),
    (100, EnforcementAction::SoftBan),
];

/// Action triggered by moving from `previous` to `current`.
///
/// The highest tier at or below `current` fires only when `previous` was
/// still below it.
pub fn enforcement_for(previous: u64, current: u64) -> Option<EnforcementAction> {
    ENFORCEMENT_TIERS
        .iter()
        .find(|(threshold, _)| current >= *threshold)
        .filter(|(threshold, _)| previous < *threshold)
        .map(|(_, action)| *action)
}

/// Stored form of a flag under `user_flags/{account}`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FlagEntry {
    reason: FlagReason,
    ts: DateTime<Utc>,
}

/// Result of one `flag` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagOutcome {
    /// Flagged account
    pub account: AccountId,
    /// Reason recorded
    pub reason: FlagReason,
    /// Score increment
    pub delta: u64,
    /// Score before the increment committed
    pub previous_score: u64,
    /// Score after the increment committed
    pub score: u64,
    /// Enforcement applied because a threshold was crossed
    pub enforcement: Option<EnforcementOutcome>,
}

/// Result of one `adjust` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustOutcome {
    /// Adjusted account
    pub account: AccountId,
    /// Score before the adjustment
    pub previous_score: u64,
    /// Score after the adjustment
    pub score: u64,
    /// Enforcement applied because the adjustment crossed a threshold
    pub enforcement: Option<EnforcementOutcome>,
}

/// Per-account risk scores and their flag history
pub struct RiskLedger {
    store: Arc<dyn Store>,
    enforcer: Arc<Enforcer>,
}

impl RiskLedger {
    /// Create a ledger
    pub fn new(store: Arc<dyn Store>, enforcer: Arc<Enforcer>) -> Self {
        Self { store, enforcer }
    }

    /// Enforcer used on threshold crossings
    pub fn enforcer(&self) -> &Arc<Enforcer> {
        &self.enforcer
    }

    /// Record `reason` and add `delta` to the account's score.
    ///
    /// The increment is a compare-and-swap on `risk_score/{account}`, retried
    /// by the store until it commits, so concurrent detectors never lose an
    /// increment.
    ///
    /// The flag is appended before the increment. If the transaction gives up
    /// with `TransactionAborted` the flag stays recorded without a score
    /// change; redelivering the event flags again.
    pub async fn flag(
        &self,
        account: &AccountId,
        reason: FlagReason,
        delta: u64,
        now: DateTime<Utc>,
    ) -> Result<FlagOutcome> {
        self.append_flag(account, reason, now).await?;

        let committed = self
            .store
            .transact::<u64, _>(&paths::risk_score(account), |current| {
                current.unwrap_or(0).saturating_add(delta)
            })
            .await?;
        let previous_score = committed.before.unwrap_or(0);
        let score = committed.after;

        RISK_FLAGS_TOTAL.with_label_values(&[reason.as_str()]).inc();
        info!(
            account = %account,
            reason = reason.as_str(),
            delta,
            score,
            attempts = committed.attempts,
            "Account flagged"
        );

        let enforcement = match enforcement_for(previous_score, score) {
            Some(action) => Some(self.enforcer.apply(account, action, score, now).await?),
            None => None,
        };

        Ok(FlagOutcome {
            account: account.clone(),
            reason,
            delta,
            previous_score,
            score,
            enforcement,
        })
    }

    /// Append a flag without touching the score
    pub async fn append_flag(
        &self,
        account: &AccountId,
        reason: FlagReason,
        now: DateTime<Utc>,
    ) -> Result<Flag> {
        self.store
            .push_as(&paths::flags(account), &FlagEntry { reason, ts: now })
            .await?;
        debug!(account = %account, reason = reason.as_str(), "Flag recorded");

        Ok(Flag {
            account: account.clone(),
            reason,
            timestamp: now,
        })
    }

    /// Current score (0 when never flagged)
    pub async fn score(&self, account: &AccountId) -> Result<u64> {
        let score: Option<u64> = self.store.get_as(&paths::risk_score(account)).await?;
        Ok(score.unwrap_or(0))
    }

    /// Flag history in insertion order
    pub async fn flags(&self, account: &AccountId) -> Result<Vec<Flag>> {
        let entries = self.store.children(&paths::flags(account)).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(_, value)| serde_json::from_value::<FlagEntry>(value).ok())
            .map(|entry| Flag {
                account: account.clone(),
                reason: entry.reason,
                timestamp: entry.ts,
            })
            .collect())
    }

    /// Administrative reset: zero score, no enforcement record
    pub async fn reset(&self, account: &AccountId) -> Result<()> {
        clear_account(self.store.as_ref(), account).await?;
        info!(account = %account, "Risk score reset");
        Ok(())
    }

    /// Administrative signed adjustment, floored at zero.
    ///
    /// Crossing a threshold upwards enforces exactly as `flag` does, so a
    /// score moved past a tier by hand still carries its action.
    pub async fn adjust(
        &self,
        account: &AccountId,
        delta: i64,
        now: DateTime<Utc>,
    ) -> Result<AdjustOutcome> {
        let committed = self
            .store
            .transact::<u64, _>(&paths::risk_score(account), |current| {
                let next = i128::from(current.unwrap_or(0)) + i128::from(delta);
                next.clamp(0, i128::from(u64::MAX)) as u64
            })
            .await?;
        let previous_score = committed.before.unwrap_or(0);
        let score = committed.after;

        info!(account = %account, delta, score, "Risk score adjusted");

        let enforcement = match enforcement_for(previous_score, score) {
            Some(action) => Some(self.enforcer.apply(account, action, score, now).await?),
            None => None,
        };

        Ok(AdjustOutcome {
            account: account.clone(),
            previous_score,
            score,
            enforcement,
        })
    }
}

impl std::fmt::Debug for RiskLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskLedger")
            .field("enforcer", &self.enforcer)
            .finish_non_exhaustive()
    }
}
