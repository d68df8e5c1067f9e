//! External collaborators: identity claims, push notifications and SMS
//!
//! Every call the engine makes through these traits is best effort. Results
//! are folded into a [`SideEffect`] by [`best_effort`] so a failing channel is
//! logged and counted but never undoes the decision it was attached to.

use crate::metrics::SIDE_EFFECT_FAILURES_TOTAL;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::types::AccountId;

/// Failure reported by a collaborator
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct CollaboratorError(pub String);

impl From<&str> for CollaboratorError {
    fn from(msg: &str) -> Self {
        CollaboratorError(msg.to_string())
    }
}

/// Result of a collaborator call
pub type CollaboratorResult = std::result::Result<(), CollaboratorError>;

/// Identity provider custom claims
#[async_trait]
pub trait ClaimsClient: Send + Sync {
    /// Set `claim` on the account's credentials; `None` clears it
    async fn set_claim(
        &self,
        account: &AccountId,
        claim: &str,
        value: Option<bool>,
    ) -> CollaboratorResult;
}

/// Push notification dispatch
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Notify every device of one account
    async fn send_to_account(
        &self,
        account: &AccountId,
        title: &str,
        body: &str,
        data: HashMap<String, String>,
    ) -> CollaboratorResult;

    /// Broadcast to a topic
    async fn send_to_topic(&self, topic: &str, payload: Value) -> CollaboratorResult;
}

/// SMS dispatch
#[async_trait]
pub trait SmsSender: Send + Sync {
    /// Send `body` to `phone`
    async fn send(&self, phone: &str, body: &str) -> CollaboratorResult;
}

/// Outcome of one best-effort side effect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffect {
    /// Not applicable for this decision
    NotAttempted,
    /// Collaborator accepted the call
    Delivered,
    /// Collaborator returned an error
    Failed(String),
    /// Collaborator did not answer in time
    TimedOut,
}

impl SideEffect {
    /// True when delivered
    pub fn is_delivered(&self) -> bool {
        matches!(self, SideEffect::Delivered)
    }
}

/// Run `call` with a deadline, logging and counting any failure
pub async fn best_effort<F>(channel: &str, timeout: Duration, call: F) -> SideEffect
where
    F: Future<Output = CollaboratorResult>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(())) => SideEffect::Delivered,
        Ok(Err(e)) => {
            warn!(channel, error = %e, "Side effect failed");
            SIDE_EFFECT_FAILURES_TOTAL.with_label_values(&[channel]).inc();
            SideEffect::Failed(e.0)
        }
        Err(_) => {
            warn!(channel, timeout_ms = timeout.as_millis() as u64, "Side effect timed out");
            SIDE_EFFECT_FAILURES_TOTAL.with_label_values(&[channel]).inc();
            SideEffect::TimedOut
        }
    }
}

/// Claims client that only logs
#[derive(Debug, Default, Clone)]
pub struct LoggingClaims;

#[async_trait]
impl ClaimsClient for LoggingClaims {
    async fn set_claim(
        &self,
        account: &AccountId,
        claim: &str,
        value: Option<bool>,
    ) -> CollaboratorResult {
        info!(account = %account, claim, ?value, "Set claim");
        Ok(())
    }
}

/// Notifier that only logs
#[derive(Debug, Default, Clone)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn send_to_account(
        &self,
        account: &AccountId,
        title: &str,
        body: &str,
        data: HashMap<String, String>,
    ) -> CollaboratorResult {
        info!(account = %account, title, body, ?data, "Push notification");
        Ok(())
    }

    async fn send_to_topic(&self, topic: &str, payload: Value) -> CollaboratorResult {
        info!(topic, %payload, "Topic notification");
        Ok(())
    }
}

/// SMS sender that only logs.
///
/// Bodies carry one-time codes, so digits are masked before logging.
#[derive(Debug, Default, Clone)]
pub struct LoggingSms;

#[async_trait]
impl SmsSender for LoggingSms {
    async fn send(&self, phone: &str, body: &str) -> CollaboratorResult {
        info!(phone, body = %redact_digits(body), len = body.len(), "SMS");
        Ok(())
    }
}

/// Replace every ASCII digit with `*`
fn redact_digits(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii_digit() { '*' } else { c })
        .collect()
}

/// The full set of collaborators the engine talks to
#[derive(Clone)]
pub struct Collaborators {
    /// Identity claims
    pub claims: Arc<dyn ClaimsClient>,
    /// Push notifications
    pub notifier: Arc<dyn Notifier>,
    /// SMS
    pub sms: Arc<dyn SmsSender>,
}

impl Collaborators {
    /// Collaborators that log every call and never fail
    pub fn logging() -> Self {
        Self {
            claims: Arc::new(LoggingClaims),
            notifier: Arc::new(LoggingNotifier),
            sms: Arc::new(LoggingSms),
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
