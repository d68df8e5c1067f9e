//! In-process store backend
//!
//! `MemoryStore` keeps the whole document tree behind a single
//! `parking_lot::RwLock`. Transactions read without holding the write lock,
//! run the update function, then commit only if the value at the path is
//! still the one the function saw; otherwise they retry. Change events are
//! published on a `tokio::sync::broadcast` channel after the lock is released.

use crate::{
    error::{Error, Result},
    path::{self, document_scope},
    storage::{Store, UpdateFn},
    types::{ChangeEvent, TransactionOutcome},
    StoreConfig,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Document tree held in memory
pub struct MemoryStore {
    root: RwLock<Value>,
    events: broadcast::Sender<ChangeEvent>,
    config: StoreConfig,
}

impl MemoryStore {
    /// Create an empty store with default configuration
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Create an empty store
    pub fn with_config(config: StoreConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            root: RwLock::new(Value::Object(Map::new())),
            events,
            config,
        }
    }

    /// Copy of the whole tree
    pub fn snapshot(&self) -> Value {
        self.root.read().clone()
    }

    /// Apply `mutate` under the write lock and compute the document events it caused
    fn mutate<F>(&self, segments: &[&str], mutate: F) -> Vec<ChangeEvent>
    where
        F: FnOnce(&mut Value),
    {
        let scope = document_scope(segments);
        let mut root = self.root.write();
        let before = node(&root, scope).cloned();
        mutate(&mut root);
        let after = node(&root, scope).cloned();
        drop(root);

        let mut events = Vec::new();
        diff_documents(
            scope.iter().map(|s| s.to_string()).collect(),
            before.as_ref(),
            after.as_ref(),
            &mut events,
        );
        events
    }

    fn publish(&self, events: Vec<ChangeEvent>) {
        for event in events {
            tracing::trace!(path = %event.path, kind = ?event.kind(), "Change event");
            // No receivers is not an error for a change feed
            let _ = self.events.send(event);
        }
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("config", &self.config)
            .field("subscribers", &self.events.receiver_count())
            .finish_non_exhaustive()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Value>> {
        let segments = path::segments(path)?;
        let root = self.root.read();
        Ok(node(&root, &segments).cloned())
    }

    async fn set(&self, path: &str, value: Value) -> Result<()> {
        let segments = path::segments(path)?;
        let events = self.mutate(&segments, |root| write_node(root, &segments, value));
        self.publish(events);
        Ok(())
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()> {
        let segments = path::segments(path)?;
        for key in fields.keys() {
            path::segments(key)?;
        }

        let events = self.mutate(&segments, |root| {
            for (key, value) in fields {
                let mut child = segments.clone();
                child.extend(key.split('/').filter(|s| !s.is_empty()));
                write_node(root, &child, value);
            }
        });
        self.publish(events);
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.set(path, Value::Null).await
    }

    async fn push(&self, path: &str, value: Value) -> Result<String> {
        let key = Uuid::now_v7().to_string();
        self.set(&path::join(path, &key), value).await?;
        Ok(key)
    }

    async fn children(&self, path: &str) -> Result<Vec<(String, Value)>> {
        let segments = path::segments(path)?;
        let root = self.root.read();
        let mut children: Vec<(String, Value)> = match node(&root, &segments) {
            Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            _ => Vec::new(),
        };
        children.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(children)
    }

    async fn transaction(&self, path: &str, update: &UpdateFn<'_>) -> Result<TransactionOutcome> {
        let segments = path::segments(path)?;
        let max_attempts = self.config.max_transaction_retries.max(1);

        for attempt in 1..=max_attempts {
            let current = {
                let root = self.root.read();
                node(&root, &segments).cloned()
            };

            let next = match update(current.clone()) {
                Some(next) => next,
                None => {
                    return Ok(TransactionOutcome {
                        after: current.clone(),
                        before: current,
                        committed: false,
                        attempts: attempt,
                    })
                }
            };

            let mut conflicted = false;
            let events = self.mutate(&segments, |root| {
                if node(root, &segments) == current.as_ref() {
                    write_node(root, &segments, next.clone());
                } else {
                    conflicted = true;
                }
            });

            if conflicted {
                tracing::debug!(path, attempt, "Transaction conflict, retrying");
                tokio::task::yield_now().await;
                continue;
            }

            self.publish(events);
            return Ok(TransactionOutcome {
                before: current,
                after: present(next),
                committed: true,
                attempts: attempt,
            });
        }

        tracing::warn!(path, attempts = max_attempts, "Transaction aborted");
        Err(Error::TransactionAborted {
            path: path.to_string(),
            attempts: max_attempts,
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }
}

fn present(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        other => Some(other),
    }
}

/// Walk to the node at `segments`
fn node<'a>(root: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(root, |current, segment| current.as_object()?.get(*segment))
        .filter(|value| !value.is_null())
}

/// Write `value` at `segments`, creating intermediate objects.
///
/// Null removes the node and prunes ancestors left empty.
fn write_node(root: &mut Value, segments: &[&str], value: Value) {
    if !value.is_null() {
        insert_node(root, segments, value);
    } else if segments.is_empty() {
        *root = Value::Object(Map::new());
    } else {
        remove_node(root, segments);
    }
}

fn insert_node(node: &mut Value, segments: &[&str], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *node = value;
        return;
    };
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry(first.to_string()).or_insert(Value::Null);
        insert_node(child, rest, value);
    }
}

/// Remove the node at `segments`; returns true when `node` is left empty
fn remove_node(node: &mut Value, segments: &[&str]) -> bool {
    let Some(map) = node.as_object_mut() else {
        return false;
    };
    match segments {
        [] => false,
        [last] => {
            map.remove(*last);
            map.is_empty()
        }
        [first, rest @ ..] => {
            let emptied = map
                .get_mut(*first)
                .map(|child| remove_node(child, rest))
                .unwrap_or(false);
            if emptied {
                map.remove(*first);
            }
            map.is_empty()
        }
    }
}

/// Emit one event per document whose value differs.
///
/// `prefix` shorter than a document path fans out over the children.
fn diff_documents(
    prefix: Vec<String>,
    before: Option<&Value>,
    after: Option<&Value>,
    events: &mut Vec<ChangeEvent>,
) {
    if before == after {
        return;
    }

    if prefix.len() >= path::DOCUMENT_DEPTH {
        events.push(ChangeEvent::new(
            prefix.join("/"),
            before.cloned(),
            after.cloned(),
        ));
        return;
    }

    let keys: BTreeSet<&String> = [before, after]
        .iter()
        .flatten()
        .filter_map(|value| value.as_object())
        .flat_map(|map| map.keys())
        .collect();

    for key in keys {
        let mut child = prefix.clone();
        child.push(key.clone());
        diff_documents(
            child,
            before.and_then(|v| v.get(key.as_str())),
            after.and_then(|v| v.get(key.as_str())),
            events,
        );
    }
}
