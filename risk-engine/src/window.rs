//! Sliding-window event counting backed by the store
//!
//! Each event is its own child under `{collection}/{key}` with a unique push
//! id. Reads prune stale children one by one, so a concurrent append is never
//! lost to a blob rewrite.

use crate::{metrics::WINDOW_ENTRIES_PRUNED_TOTAL, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use store_core::{Store, StoreExt};
use tracing::debug;

/// One observed event
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WindowEntry {
    ts: DateTime<Utc>,
}

/// Windowed counter over one store collection
#[derive(Clone)]
pub struct WindowedCounter {
    store: Arc<dyn Store>,
    collection: String,
}

impl WindowedCounter {
    /// Counter storing entries under `collection/{key}/{pushId}`
    pub fn new(store: Arc<dyn Store>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
        }
    }

    fn key_path(&self, key: &str) -> String {
        format!("{}/{}", self.collection, key)
    }

    /// Append an event at `timestamp`, returning its entry id
    pub async fn record(&self, key: &str, timestamp: DateTime<Utc>) -> Result<String> {
        let id = self
            .store
            .push_as(&self.key_path(key), &WindowEntry { ts: timestamp })
            .await?;
        Ok(id)
    }

    /// Count entries no older than `now - window`, deleting the rest
    pub async fn count_recent_and_prune(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<usize> {
        let base = self.key_path(key);
        let cutoff = now - window;
        let mut recent = 0;

        for (id, value) in self.store.children(&base).await? {
            let fresh = serde_json::from_value::<WindowEntry>(value)
                .map(|entry| entry.ts >= cutoff)
                .unwrap_or(false);

            if fresh {
                recent += 1;
            } else {
                self.store.remove(&format!("{}/{}", base, id)).await?;
                WINDOW_ENTRIES_PRUNED_TOTAL.inc();
                debug!(collection = %self.collection, key, entry = %id, "Pruned window entry");
            }
        }

        Ok(recent)
    }
}

impl std::fmt::Debug for WindowedCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowedCounter")
            .field("collection", &self.collection)
            .finish()
    }
}
