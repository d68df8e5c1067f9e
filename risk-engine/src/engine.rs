//! Wiring of the engine's components over one store

use crate::{
    collaborators::Collaborators,
    config::Config,
    detectors::Detectors,
    enforcement::Enforcer,
    handlers::{register_detectors, OtpSweepJob},
    issuer::BackoffIssuer,
    ledger::RiskLedger,
    otp::OtpService,
    Result,
};
use std::sync::Arc;
use store_core::Store;
use tokio::task::JoinHandle;
use tracing::info;
use trigger_bus::TriggerRuntime;

/// Name of the scheduled OTP expiry job
pub const OTP_SWEEP_JOB: &str = "otp_expiry_sweep";

/// Every component, sharing one store and one set of collaborators
pub struct RiskEngine {
    store: Arc<dyn Store>,
    config: Config,
    enforcer: Arc<Enforcer>,
    ledger: Arc<RiskLedger>,
    detectors: Arc<Detectors>,
    issuer: Arc<BackoffIssuer>,
    otp: Arc<OtpService>,
}

impl RiskEngine {
    /// Build the engine
    pub fn new(store: Arc<dyn Store>, collaborators: Collaborators, config: Config) -> Result<Self> {
        config.validate()?;
        let timeout = config.side_effects.timeout();

        let enforcer = Arc::new(Enforcer::new(
            store.clone(),
            collaborators.claims.clone(),
            collaborators.notifier.clone(),
            timeout,
        ));
        let ledger = Arc::new(RiskLedger::new(store.clone(), enforcer.clone()));
        let detectors = Arc::new(Detectors::new(store.clone(), ledger.clone()));
        let issuer = Arc::new(BackoffIssuer::new(store.clone(), config.issuer.clone()));
        let otp = Arc::new(OtpService::new(
            store.clone(),
            issuer.clone(),
            ledger.clone(),
            collaborators.notifier,
            collaborators.sms,
            config.otp.clone(),
            timeout,
        ));

        Ok(Self {
            store,
            config,
            enforcer,
            ledger,
            detectors,
            issuer,
            otp,
        })
    }

    /// Trigger runtime with every detector registered
    pub fn runtime(&self) -> Result<TriggerRuntime> {
        let mut runtime = TriggerRuntime::new(self.config.triggers.clone());
        register_detectors(&mut runtime, self.detectors.clone())?;
        Ok(runtime)
    }

    /// Start consuming store changes and the OTP sweep.
    ///
    /// Returns the feed task and the sweep task.
    pub fn start(&self) -> Result<(JoinHandle<()>, JoinHandle<()>)> {
        let runtime = Arc::new(self.runtime()?);
        let sweep = TriggerRuntime::schedule(
            OTP_SWEEP_JOB,
            self.config.otp.sweep_interval(),
            Arc::new(OtpSweepJob::new(self.otp.clone())),
        );
        let feed = runtime.run(self.store.subscribe());

        info!("Risk engine started");
        Ok((feed, sweep))
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Enforcement state machine
    pub fn enforcer(&self) -> &Arc<Enforcer> {
        &self.enforcer
    }

    /// Risk ledger
    pub fn ledger(&self) -> &Arc<RiskLedger> {
        &self.ledger
    }

    /// Anomaly detectors
    pub fn detectors(&self) -> &Arc<Detectors> {
        &self.detectors
    }

    /// Issuance quota
    pub fn issuer(&self) -> &Arc<BackoffIssuer> {
        &self.issuer
    }

    /// One-time codes
    pub fn otp(&self) -> &Arc<OtpService> {
        &self.otp
    }
}

impl std::fmt::Debug for RiskEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
