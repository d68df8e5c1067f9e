//! Handler traits implemented by consumers of the runtime

use crate::event::TriggerEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Reacts to a watched mutation.
///
/// Invocations have no caller to report to: an `Err` is logged and counted,
/// never retried.
#[async_trait]
pub trait TriggerHandler: Send + Sync {
    /// Handle one event
    async fn handle(&self, event: TriggerEvent) -> anyhow::Result<()>;
}

/// Work run on a fixed wall-clock interval
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    /// Run once at `now`
    async fn run(&self, now: DateTime<Utc>) -> anyhow::Result<()>;
}
