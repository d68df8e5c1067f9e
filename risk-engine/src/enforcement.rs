//! Enforcement state machine
//!
//! ```text
//!  clear ──flag──▶ flagged ──score≥100──▶ soft_ban ──score≥200──▶ locked
//!    ▲                                                              │
//!    └──────────────────────────── lift (admin) ◀───────────────────┘
//! ```
//!
//! The enforcement record is authoritative. The `locked` credential claim is
//! propagated best effort and may lag or fail; hard denial must read the
//! record.

use crate::{
    collaborators::{best_effort, ClaimsClient, Notifier, SideEffect},
    metrics::ENFORCEMENT_ACTIONS_TOTAL,
    paths,
    types::{AccountId, EnforcementAction, EnforcementRecord, EnforcementState},
    Result,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use store_core::{Store, StoreExt};
use tracing::{info, warn};

/// Credential claim attached to locked accounts
pub const LOCKED_CLAIM: &str = "locked";

/// Topic notified of every enforcement action
pub const ADMIN_TOPIC: &str = "admins";

/// Result of applying an action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnforcementOutcome {
    /// Enforced account
    pub account: AccountId,
    /// Record now stored for the account
    pub record: EnforcementRecord,
    /// Credential claim propagation
    pub claim: SideEffect,
    /// Admin topic notification
    pub broadcast: SideEffect,
}

/// Result of lifting enforcement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiftOutcome {
    /// Lifted account
    pub account: AccountId,
    /// Record that was removed, if any
    pub previous: Option<EnforcementRecord>,
    /// Claim removal
    pub claim: SideEffect,
}

/// Persists enforcement records and propagates them to collaborators
pub struct Enforcer {
    store: Arc<dyn Store>,
    claims: Arc<dyn ClaimsClient>,
    notifier: Arc<dyn Notifier>,
    side_effect_timeout: Duration,
}

impl Enforcer {
    /// Create an enforcer
    pub fn new(
        store: Arc<dyn Store>,
        claims: Arc<dyn ClaimsClient>,
        notifier: Arc<dyn Notifier>,
        side_effect_timeout: Duration,
    ) -> Self {
        Self {
            store,
            claims,
            notifier,
            side_effect_timeout,
        }
    }

    /// Overwrite the account's enforcement record with `action`.
    ///
    /// The record is committed before any side effect is attempted, and stays
    /// committed whatever the side effects report.
    pub async fn apply(
        &self,
        account: &AccountId,
        action: EnforcementAction,
        score: u64,
        now: DateTime<Utc>,
    ) -> Result<EnforcementOutcome> {
        let record = EnforcementRecord {
            action,
            score,
            timestamp: now,
        };
        self.store
            .set_as(&paths::enforcement(account), &record)
            .await?;

        ENFORCEMENT_ACTIONS_TOTAL
            .with_label_values(&[action.as_str()])
            .inc();
        info!(account = %account, action = action.as_str(), score, "Enforcement applied");

        let claim = match action {
            EnforcementAction::Locked => {
                best_effort(
                    "claims",
                    self.side_effect_timeout,
                    self.claims.set_claim(account, LOCKED_CLAIM, Some(true)),
                )
                .await
            }
            EnforcementAction::SoftBan => SideEffect::NotAttempted,
        };

        let payload = json!({
            "type": "enforcement",
            "account": account,
            "action": action,
            "score": score,
            "ts": now,
        });
        let broadcast = best_effort(
            "topic",
            self.side_effect_timeout,
            self.notifier.send_to_topic(ADMIN_TOPIC, payload),
        )
        .await;

        Ok(EnforcementOutcome {
            account: account.clone(),
            record,
            claim,
            broadcast,
        })
    }

    /// Administrative lift: back to `clear`
    pub async fn lift(&self, account: &AccountId) -> Result<LiftOutcome> {
        let previous = self.record(account).await?;
        clear_account(self.store.as_ref(), account).await?;

        let claim = best_effort(
            "claims",
            self.side_effect_timeout,
            self.claims.set_claim(account, LOCKED_CLAIM, None),
        )
        .await;
        if !claim.is_delivered() {
            warn!(account = %account, "Enforcement lifted but claim removal did not go through");
        }
        info!(account = %account, "Enforcement lifted");

        Ok(LiftOutcome {
            account: account.clone(),
            previous,
            claim,
        })
    }

    /// Current enforcement record
    pub async fn record(&self, account: &AccountId) -> Result<Option<EnforcementRecord>> {
        Ok(self.store.get_as(&paths::enforcement(account)).await?)
    }

    /// Current position in the state machine
    pub async fn state(&self, account: &AccountId) -> Result<EnforcementState> {
        let score: Option<u64> = self.store.get_as(&paths::risk_score(account)).await?;
        let record = self.record(account).await?;
        Ok(EnforcementState::from_parts(
            score.unwrap_or(0),
            record.as_ref(),
        ))
    }
}

impl std::fmt::Debug for Enforcer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enforcer")
            .field("side_effect_timeout", &self.side_effect_timeout)
            .finish_non_exhaustive()
    }
}

/// Zero the score and drop the enforcement record
pub(crate) async fn clear_account(store: &dyn Store, account: &AccountId) -> Result<()> {
    store.remove(&paths::enforcement(account)).await?;
    store.set(&paths::risk_score(account), json!(0)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{CollaboratorError, CollaboratorResult, LoggingNotifier};
    use async_trait::async_trait;
    use store_core::MemoryStore;

    struct FailingClaims;

    #[async_trait]
    impl ClaimsClient for FailingClaims {
        async fn set_claim(&self, _: &AccountId, _: &str, _: Option<bool>) -> CollaboratorResult {
            Err(CollaboratorError::from("identity service unavailable"))
        }
    }

    fn enforcer(store: Arc<MemoryStore>, claims: Arc<dyn ClaimsClient>) -> Enforcer {
        Enforcer::new(
            store,
            claims,
            Arc::new(LoggingNotifier),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_locked_commits_despite_claim_failure() {
        let store = Arc::new(MemoryStore::new());
        let enforcer = enforcer(store.clone(), Arc::new(FailingClaims));
        let account = AccountId::new("u1");
        store.set("risk_score/u1", json!(210)).await.unwrap();

        let outcome = enforcer
            .apply(&account, EnforcementAction::Locked, 210, Utc::now())
            .await
            .unwrap();

        assert!(matches!(outcome.claim, SideEffect::Failed(_)));
        assert_eq!(outcome.broadcast, SideEffect::Delivered);

        let record = enforcer.record(&account).await.unwrap().unwrap();
        assert_eq!(record.action, EnforcementAction::Locked);
        assert_eq!(record.score, 210);
        assert_eq!(enforcer.state(&account).await.unwrap(), EnforcementState::Locked);
    }

    #[tokio::test]
    async fn test_soft_ban_skips_claims() {
        let store = Arc::new(MemoryStore::new());
        let enforcer = enforcer(store, Arc::new(FailingClaims));

        let outcome = enforcer
            .apply(&AccountId::new("u1"), EnforcementAction::SoftBan, 110, Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome.claim, SideEffect::NotAttempted);
    }

    #[tokio::test]
    async fn test_latest_action_wins() {
        let store = Arc::new(MemoryStore::new());
        let enforcer = enforcer(store, Arc::new(crate::collaborators::LoggingClaims));
        let account = AccountId::new("u1");

        enforcer
            .apply(&account, EnforcementAction::Locked, 200, Utc::now())
            .await
            .unwrap();
        enforcer
            .apply(&account, EnforcementAction::SoftBan, 100, Utc::now())
            .await
            .unwrap();

        let record = enforcer.record(&account).await.unwrap().unwrap();
        assert_eq!(record.action, EnforcementAction::SoftBan);
    }

    #[tokio::test]
    async fn test_lift_returns_to_clear() {
        let store = Arc::new(MemoryStore::new());
        let enforcer = enforcer(store.clone(), Arc::new(FailingClaims));
        let account = AccountId::new("u1");
        store.set("risk_score/u1", json!(250)).await.unwrap();
        enforcer
            .apply(&account, EnforcementAction::Locked, 250, Utc::now())
            .await
            .unwrap();

        let lifted = enforcer.lift(&account).await.unwrap();
        assert_eq!(lifted.previous.map(|r| r.action), Some(EnforcementAction::Locked));
        assert!(matches!(lifted.claim, SideEffect::Failed(_)));

        assert_eq!(enforcer.record(&account).await.unwrap(), None);
        assert_eq!(store.get("risk_score/u1").await.unwrap(), Some(json!(0)));
        assert_eq!(enforcer.state(&account).await.unwrap(), EnforcementState::Clear);
    }
}
