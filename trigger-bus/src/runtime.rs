//! Trigger runtime: turns store change events into handler invocations
//!
//! ```text
//!   Store::subscribe()            TriggerRuntime              handlers
//!  ──────────────────▶  resolve(pattern, kind) ──spawn──▶  handle(TriggerEvent)
//!    ChangeEvent          one event per match              (independent tasks)
//! ```
//!
//! Every invocation runs as its own task bounded by the configured handler
//! timeout; handlers must not assume exclusive access to anything.

use crate::{
    event::TriggerEvent,
    handler::{ScheduledJob, TriggerHandler},
    metrics::{
        CHANGE_EVENTS_LAGGED, SCHEDULED_RUNS_TOTAL, TRIGGER_DURATION, TRIGGER_INVOCATIONS_TOTAL,
    },
    pattern::PathPattern,
    types::{RuntimeConfig, TriggerKind},
    Error, Result,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use store_core::ChangeEvent;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

struct Registration {
    pattern: PathPattern,
    kind: TriggerKind,
    handler: Arc<dyn TriggerHandler>,
}

/// A handler paired with the event it should receive
pub struct Invocation {
    /// Handler to run
    pub handler: Arc<dyn TriggerHandler>,
    /// Event for the handler
    pub event: TriggerEvent,
}

/// Registry of watched patterns and the loop that feeds them
pub struct TriggerRuntime {
    config: RuntimeConfig,
    registrations: Vec<Registration>,
}

impl TriggerRuntime {
    /// Create an empty runtime
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            registrations: Vec::new(),
        }
    }

    /// Watch `pattern` for `kind` mutations
    pub fn register(
        &mut self,
        pattern: &str,
        kind: TriggerKind,
        handler: Arc<dyn TriggerHandler>,
    ) -> Result<&mut Self> {
        let pattern = PathPattern::parse(pattern)?;
        info!(pattern = %pattern, kind = kind.as_str(), "Trigger registered");
        self.registrations.push(Registration {
            pattern,
            kind,
            handler,
        });
        Ok(self)
    }

    /// Number of registered triggers
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Work out which handlers a change event fires
    pub fn resolve(&self, change: &ChangeEvent) -> Vec<Invocation> {
        self.registrations
            .iter()
            .filter_map(|registration| {
                let params = registration.pattern.match_document(&change.path)?;
                let before = registration.pattern.select(change.before.as_ref());
                let after = registration.pattern.select(change.after.as_ref());
                if before == after || !registration.kind.fires(before, after) {
                    return None;
                }

                Some(Invocation {
                    handler: registration.handler.clone(),
                    event: TriggerEvent {
                        id: Uuid::now_v7(),
                        pattern: registration.pattern.as_str().to_string(),
                        path: registration.pattern.resolve(&change.path),
                        params,
                        before: before.cloned(),
                        after: after.cloned(),
                        timestamp: change.timestamp,
                    },
                })
            })
            .collect()
    }

    /// Run every handler fired by `change` concurrently and wait for them
    pub async fn dispatch(&self, change: &ChangeEvent) -> Vec<Result<()>> {
        let invocations = self.resolve(change);
        let timeout = self.config.handler_timeout();
        futures::future::join_all(
            invocations
                .into_iter()
                .map(|invocation| invoke(invocation, timeout)),
        )
        .await
    }

    /// Consume a change feed until it closes, one task per invocation
    pub fn run(self: Arc<Self>, mut changes: broadcast::Receiver<ChangeEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(triggers = self.len(), "Trigger runtime started");
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        let timeout = self.config.handler_timeout();
                        for invocation in self.resolve(&change) {
                            tokio::spawn(async move {
                                // Outcome already logged and counted
                                let _ = invoke(invocation, timeout).await;
                            });
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        CHANGE_EVENTS_LAGGED.inc_by(skipped);
                        warn!(skipped, "Trigger runtime lagging, change events dropped");
                    }
                    Err(RecvError::Closed) => {
                        info!("Change feed closed, trigger runtime stopping");
                        break;
                    }
                }
            }
        })
    }

    /// Run `job` every `every`, starting after the first interval
    pub fn schedule(name: &str, every: Duration, job: Arc<dyn ScheduledJob>) -> JoinHandle<()> {
        let name = name.to_string();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // interval() fires immediately; skip that tick
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match job.run(Utc::now()).await {
                    Ok(()) => {
                        SCHEDULED_RUNS_TOTAL.with_label_values(&[name.as_str(), "ok"]).inc();
                        debug!(job = %name, "Scheduled job completed");
                    }
                    Err(e) => {
                        SCHEDULED_RUNS_TOTAL.with_label_values(&[name.as_str(), "error"]).inc();
                        error!(job = %name, error = %e, "Scheduled job failed");
                    }
                }
            }
        })
    }
}

impl Default for TriggerRuntime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl std::fmt::Debug for TriggerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let patterns: Vec<&str> = self
            .registrations
            .iter()
            .map(|r| r.pattern.as_str())
            .collect();
        f.debug_struct("TriggerRuntime")
            .field("config", &self.config)
            .field("patterns", &patterns)
            .finish()
    }
}

async fn invoke(invocation: Invocation, timeout: Duration) -> Result<()> {
    let Invocation { handler, event } = invocation;
    let pattern = event.pattern.clone();
    let event_id = event.id;
    let path = event.path.clone();
    let start = Instant::now();

    let outcome = tokio::time::timeout(timeout, handler.handle(event)).await;
    TRIGGER_DURATION
        .with_label_values(&[pattern.as_str()])
        .observe(start.elapsed().as_secs_f64());

    match outcome {
        Ok(Ok(())) => {
            TRIGGER_INVOCATIONS_TOTAL.with_label_values(&[pattern.as_str(), "ok"]).inc();
            debug!(%event_id, %path, "Trigger handled");
            Ok(())
        }
        Ok(Err(e)) => {
            TRIGGER_INVOCATIONS_TOTAL.with_label_values(&[pattern.as_str(), "error"]).inc();
            error!(%event_id, %path, error = %e, "Trigger handler failed");
            Err(Error::Handler {
                pattern,
                message: format!("{:#}", e),
            })
        }
        Err(_) => {
            TRIGGER_INVOCATIONS_TOTAL.with_label_values(&[pattern.as_str(), "timeout"]).inc();
            error!(%event_id, %path, ?timeout, "Trigger handler timed out");
            Err(Error::HandlerTimeout { pattern, timeout })
        }
    }
}
