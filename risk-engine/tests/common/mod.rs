//! Shared fixtures: recording collaborators and a synchronous change pump

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use risk_engine::{
    collaborators::{CollaboratorError, CollaboratorResult},
    AccountId, ClaimsClient, Collaborators, Config, Notifier, RiskEngine, SmsSender,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use store_core::{ChangeEvent, MemoryStore, Store};
use tokio::sync::broadcast::{self, error::TryRecvError};
use trigger_bus::TriggerRuntime;

#[derive(Default)]
pub struct RecordingClaims {
    pub calls: Mutex<Vec<(String, String, Option<bool>)>>,
    pub fail: bool,
}

#[async_trait]
impl ClaimsClient for RecordingClaims {
    async fn set_claim(
        &self,
        account: &AccountId,
        claim: &str,
        value: Option<bool>,
    ) -> CollaboratorResult {
        self.calls
            .lock()
            .push((account.to_string(), claim.to_string(), value));
        if self.fail {
            return Err(CollaboratorError::from("identity service unavailable"));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub accounts: Mutex<Vec<(String, HashMap<String, String>)>>,
    pub topics: Mutex<Vec<(String, Value)>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_to_account(
        &self,
        account: &AccountId,
        _title: &str,
        _body: &str,
        data: HashMap<String, String>,
    ) -> CollaboratorResult {
        self.accounts.lock().push((account.to_string(), data));
        Ok(())
    }

    async fn send_to_topic(&self, topic: &str, payload: Value) -> CollaboratorResult {
        self.topics.lock().push((topic.to_string(), payload));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSms {
    pub sent: Mutex<Vec<(String, String)>>,
}

impl RecordingSms {
    /// Digits of the most recent code sent
    pub fn last_code(&self) -> String {
        let sent = self.sent.lock();
        let (_, body) = sent.last().expect("no SMS sent");
        body.chars().filter(|c| c.is_ascii_digit()).collect()
    }
}

#[async_trait]
impl SmsSender for RecordingSms {
    async fn send(&self, phone: &str, body: &str) -> CollaboratorResult {
        self.sent.lock().push((phone.to_string(), body.to_string()));
        Ok(())
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub engine: RiskEngine,
    pub runtime: TriggerRuntime,
    pub changes: broadcast::Receiver<ChangeEvent>,
    pub claims: Arc<RecordingClaims>,
    pub notifier: Arc<RecordingNotifier>,
    pub sms: Arc<RecordingSms>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(false)
    }

    pub fn with_failing_claims() -> Self {
        Self::build(true)
    }

    fn build(fail_claims: bool) -> Self {
        let store = Arc::new(MemoryStore::new());
        let claims = Arc::new(RecordingClaims {
            fail: fail_claims,
            ..RecordingClaims::default()
        });
        let notifier = Arc::new(RecordingNotifier::default());
        let sms = Arc::new(RecordingSms::default());
        let collaborators = Collaborators {
            claims: claims.clone(),
            notifier: notifier.clone(),
            sms: sms.clone(),
        };

        let mut config = Config::default();
        config.otp.hmac_secret = "test-secret".to_string();

        let engine = RiskEngine::new(store.clone(), collaborators, config).unwrap();
        let runtime = engine.runtime().unwrap();
        let changes = store.subscribe();

        Self {
            store,
            engine,
            runtime,
            changes,
            claims,
            notifier,
            sms,
        }
    }

    /// Dispatch every pending change, including the ones handlers cause,
    /// returning the events that were dispatched
    pub async fn settle(&mut self) -> Vec<ChangeEvent> {
        let mut seen = Vec::new();
        loop {
            match self.changes.try_recv() {
                Ok(change) => {
                    for result in self.runtime.dispatch(&change).await {
                        result.unwrap();
                    }
                    seen.push(change);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return seen,
                Err(TryRecvError::Lagged(n)) => panic!("harness lagged by {}", n),
            }
        }
    }

    pub async fn score(&self, account: &str) -> u64 {
        self.engine
            .ledger()
            .score(&AccountId::new(account))
            .await
            .unwrap()
    }

    pub async fn reasons(&self, account: &str) -> Vec<String> {
        self.engine
            .ledger()
            .flags(&AccountId::new(account))
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.reason.to_string())
            .collect()
    }
}
