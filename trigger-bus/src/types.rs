//! Type definitions for the trigger runtime

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Which mutations a handler is interested in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerKind {
    /// Value appeared
    OnCreate,
    /// Value existed before and after and changed
    OnUpdate,
    /// Value disappeared
    OnDelete,
    /// Any of the above
    OnWrite,
}

impl TriggerKind {
    /// Does a transition from `before` to `after` fire this kind?
    ///
    /// Callers only ask for transitions that changed something.
    pub fn fires(&self, before: Option<&Value>, after: Option<&Value>) -> bool {
        match self {
            TriggerKind::OnCreate => before.is_none() && after.is_some(),
            TriggerKind::OnUpdate => before.is_some() && after.is_some(),
            TriggerKind::OnDelete => before.is_some() && after.is_none(),
            TriggerKind::OnWrite => true,
        }
    }

    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::OnCreate => "create",
            TriggerKind::OnUpdate => "update",
            TriggerKind::OnDelete => "delete",
            TriggerKind::OnWrite => "write",
        }
    }
}

/// Runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Upper bound on a single handler invocation (milliseconds)
    pub handler_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            handler_timeout_ms: 60_000,
        }
    }
}

impl RuntimeConfig {
    /// Handler bound as a `Duration`
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }
}
