//! Persistent store contract
//!
//! The store is a JSON document tree addressed by slash-separated paths.
//! Backends must provide:
//!
//! - **Addressable reads/writes**: `get`, `set`, `update`, `remove`
//! - **Unique appends**: `push` returns a fresh, time-ordered child key
//! - **Atomic read-modify-write**: `transaction` re-runs the update function
//!   until it commits against an unchanged value (compare-and-swap)
//! - **Change feed**: `subscribe` yields document-level [`ChangeEvent`]s

use crate::{
    error::Result,
    types::{ChangeEvent, Transacted, TransactionOutcome},
};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

/// Update function run by [`Store::transaction`].
///
/// Receives the current value (`None` when absent) and returns the value to
/// write. Returning `None` leaves the path untouched; returning
/// `Some(Value::Null)` deletes it. May be invoked more than once.
pub type UpdateFn<'a> = dyn Fn(Option<Value>) -> Option<Value> + Send + Sync + 'a;

/// Document store with compare-and-swap transactions and a change feed
#[async_trait]
pub trait Store: Send + Sync {
    /// Read the value at `path`
    async fn get(&self, path: &str) -> Result<Option<Value>>;

    /// Overwrite the value at `path` (`Value::Null` removes it)
    async fn set(&self, path: &str, value: Value) -> Result<()>;

    /// Merge `fields` into the object at `path`
    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()>;

    /// Remove the value at `path`
    async fn remove(&self, path: &str) -> Result<()>;

    /// Append `value` under a new unique child of `path`, returning its key
    async fn push(&self, path: &str, value: Value) -> Result<String>;

    /// List the children of `path` ordered by key
    async fn children(&self, path: &str) -> Result<Vec<(String, Value)>>;

    /// Atomically transform the value at `path`
    async fn transaction(&self, path: &str, update: &UpdateFn<'_>) -> Result<TransactionOutcome>;

    /// Subscribe to document-level change events
    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;
}

/// Typed helpers over any [`Store`]
#[async_trait]
pub trait StoreExt: Store {
    /// Read and deserialize the value at `path`
    async fn get_as<T>(&self, path: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(path).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Serialize and write `value` at `path`
    async fn set_as<T>(&self, path: &str, value: &T) -> Result<()>
    where
        T: Serialize + Sync,
    {
        let value = serde_json::to_value(value)?;
        self.set(path, value).await
    }

    /// Serialize and append `value` under `path`
    async fn push_as<T>(&self, path: &str, value: &T) -> Result<String>
    where
        T: Serialize + Sync,
    {
        let value = serde_json::to_value(value)?;
        self.push(path, value).await
    }

    /// Typed compare-and-swap.
    ///
    /// A stored value that does not deserialize as `T` is handed to `update`
    /// as `None`, so counters recover from garbage the same way they start
    /// from nothing.
    async fn transact<T, F>(&self, path: &str, update: F) -> Result<Transacted<T>>
    where
        T: Serialize + DeserializeOwned + Send,
        F: Fn(Option<T>) -> T + Send + Sync,
    {
        let raw = move |current: Option<Value>| -> Option<Value> {
            let typed = current.and_then(|value| serde_json::from_value::<T>(value).ok());
            serde_json::to_value(update(typed)).ok()
        };

        let outcome = self.transaction(path, &raw).await?;
        let before = outcome
            .before
            .and_then(|value| serde_json::from_value::<T>(value).ok());
        let after = serde_json::from_value(outcome.after.unwrap_or(Value::Null))?;

        Ok(Transacted {
            before,
            after,
            attempts: outcome.attempts,
        })
    }
}

impl<S: Store + ?Sized> StoreExt for S {}
