//! Event trigger runtime
//!
//! Invokes handlers with `(before, after, params)` when a watched store path
//! is created, updated or deleted, and runs jobs on a fixed schedule:
//! - Path patterns with `{param}` captures
//! - Field-level watches inside a document
//! - Concurrent, independently failing invocations
//! - Observability via Prometheus metrics

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod error;
pub mod event;
pub mod handler;
pub mod metrics;
pub mod pattern;
pub mod runtime;
pub mod types;

pub use error::{Error, Result};
pub use event::TriggerEvent;
pub use handler::{ScheduledJob, TriggerHandler};
pub use pattern::PathPattern;
pub use runtime::{Invocation, TriggerRuntime};
pub use types::{RuntimeConfig, TriggerKind};
