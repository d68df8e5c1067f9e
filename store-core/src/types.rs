//! Core types shared by store backends and their consumers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of mutation observed on a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// Document did not exist before the write
    Created,
    /// Document existed before and after the write
    Updated,
    /// Document no longer exists
    Deleted,
}

/// Document-level change notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Document path (`collection/id`)
    pub path: String,

    /// Document value before the write
    pub before: Option<Value>,

    /// Document value after the write
    pub after: Option<Value>,

    /// When the write was applied
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    /// Create a change event stamped with the current time
    pub fn new(path: impl Into<String>, before: Option<Value>, after: Option<Value>) -> Self {
        Self {
            path: path.into(),
            before,
            after,
            timestamp: Utc::now(),
        }
    }

    /// Classify the change
    pub fn kind(&self) -> ChangeKind {
        match (&self.before, &self.after) {
            (None, _) => ChangeKind::Created,
            (Some(_), Some(_)) => ChangeKind::Updated,
            (Some(_), None) => ChangeKind::Deleted,
        }
    }
}

/// Result of a raw compare-and-swap transaction
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionOutcome {
    /// Value the committing attempt ran against
    pub before: Option<Value>,

    /// Value left at the path
    pub after: Option<Value>,

    /// False when the update function declined to write
    pub committed: bool,

    /// Attempts used, including the committing one
    pub attempts: u32,
}

/// Result of a typed transaction
#[derive(Debug, Clone, PartialEq)]
pub struct Transacted<T> {
    /// Value the committing attempt ran against
    pub before: Option<T>,

    /// Value written
    pub after: T,

    /// Attempts used, including the committing one
    pub attempts: u32,
}
