//! Risk worker
//!
//! Hosts the detectors and the OTP sweep against an in-process store.

use anyhow::Context;
use risk_engine::{Collaborators, Config, RiskEngine};
use std::sync::Arc;
use store_core::MemoryStore;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting risk worker");

    let config = if let Ok(config_path) = std::env::var("RISK_CONFIG") {
        info!("Loading config from: {}", config_path);
        Config::from_file(&config_path)
            .with_context(|| format!("loading {}", config_path))?
    } else {
        info!("Loading config from environment variables");
        Config::from_env().context("loading config from environment")?
    };

    if config.otp.hmac_secret.is_empty() {
        warn!("OTP_HMAC_SECRET is not set; code hashes use an empty key");
    }

    let store = Arc::new(MemoryStore::with_config(config.store.clone()));
    let engine = RiskEngine::new(store, Collaborators::logging(), config)?;
    let (feed, sweep) = engine.start()?;

    info!("Risk worker running. Press Ctrl+C to stop.");
    signal::ctrl_c().await?;

    info!("Shutting down");
    feed.abort();
    sweep.abort();
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("RISK_LOG_JSON").map(|v| v == "1").unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}
