//! Document store contract for the risk core
//!
//! Hosted real-time stores expose a JSON tree, atomic read-modify-write on a
//! single path, and a change feed. This crate captures that contract as the
//! [`Store`] trait and ships [`MemoryStore`], an in-process backend used by
//! tests, local workers and anything that does not need durability.
//!
//! # Invariants
//!
//! - Transactions are scoped to exactly one path; no lock spans two keys
//! - A transaction commits only against the value its update function saw
//! - Change events are document-scoped (`collection/id`) and emitted only for
//!   writes that changed something

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod error;
pub mod memory;
pub mod path;
pub mod storage;
pub mod types;

// Re-exports
pub use config::StoreConfig;
pub use error::{Error, Result};
pub use memory::MemoryStore;
pub use storage::{Store, StoreExt, UpdateFn};
pub use types::{ChangeEvent, ChangeKind, Transacted, TransactionOutcome};
