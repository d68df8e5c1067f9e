//! Configuration for the store

use serde::{Deserialize, Serialize};

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Compare-and-swap attempts before a transaction is abandoned
    pub max_transaction_retries: u32,

    /// Change events buffered per subscriber before it starts lagging
    pub event_buffer: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_transaction_retries: 64,
            event_buffer: 1024,
        }
    }
}

impl StoreConfig {
    /// Reject settings the store cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_transaction_retries == 0 {
            return Err(crate::Error::Config(
                "max_transaction_retries must be at least 1".to_string(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(crate::Error::Config(
                "event_buffer must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
