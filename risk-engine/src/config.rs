//! Configuration for the risk engine

use crate::{issuer::IssuerConfig, otp::OtpConfig, Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use store_core::StoreConfig;
use trigger_bus::RuntimeConfig;

/// Engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// One-time codes
    pub otp: OtpConfig,

    /// Issuance quota
    pub issuer: IssuerConfig,

    /// Best-effort collaborator calls
    pub side_effects: SideEffectConfig,

    /// Store backend
    pub store: StoreConfig,

    /// Trigger runtime
    pub triggers: RuntimeConfig,
}

/// Bounds on notification, SMS and claim calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SideEffectConfig {
    /// Per-call timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for SideEffectConfig {
    fn default() -> Self {
        Self { timeout_ms: 5_000 }
    }
}

impl SideEffectConfig {
    /// Per-call timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Config {
    /// Load from a TOML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::InvalidConfig(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Config::default();

        if let Some(v) = var("OTP_EXPIRY_MS") {
            config.otp.expiry_ms = parse("OTP_EXPIRY_MS", &v)?;
        }

        if let Some(v) = var("MAX_OTP_ATTEMPTS") {
            config.otp.max_attempts = parse("MAX_OTP_ATTEMPTS", &v)?;
        }

        if let Some(v) = var("OTP_GEN_LIMIT_PER_HOUR") {
            config.issuer.limit_per_window = parse("OTP_GEN_LIMIT_PER_HOUR", &v)?;
        }

        if let Some(secret) = var("OTP_HMAC_SECRET") {
            config.otp.hmac_secret = secret;
        }

        if let Some(v) = var("RISK_SIDE_EFFECT_TIMEOUT_MS") {
            config.side_effects.timeout_ms = parse("RISK_SIDE_EFFECT_TIMEOUT_MS", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.otp.expiry_ms == 0, "otp.expiry_ms must be positive"),
            (self.otp.max_attempts == 0, "otp.max_attempts must be at least 1"),
            (
                self.otp.sweep_interval_secs == 0,
                "otp.sweep_interval_secs must be positive",
            ),
            (
                self.issuer.limit_per_window == 0,
                "issuer.limit_per_window must be at least 1",
            ),
            (self.issuer.window_secs == 0, "issuer.window_secs must be positive"),
            (
                self.issuer.backoff_unit_secs == 0,
                "issuer.backoff_unit_secs must be positive",
            ),
            (
                self.side_effects.timeout_ms == 0,
                "side_effects.timeout_ms must be positive",
            ),
            (
                self.triggers.handler_timeout_ms == 0,
                "triggers.handler_timeout_ms must be positive",
            ),
        ];

        if let Some((_, msg)) = checks.iter().find(|(failed, _)| *failed) {
            return Err(Error::InvalidConfig(msg.to_string()));
        }

        self.store.validate()?;
        Ok(())
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::InvalidConfig(format!("{}={:?}: {}", key, value, e)))
}
