use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, warn};
use serde_json::Value;
use tokio::time::Instant;

use crate::cache::{CachedValue, ReadCache};
use crate::engine::record::generate_id;
use crate::{Error, Result};

/// TTL speculative values are written with; the confirming refetch replaces them.
pub const OPTIMISTIC_TTL: Duration = Duration::from_secs(5);

/// One speculative write, kept until it is committed or reverted.
#[derive(Debug, Clone)]
pub struct OptimisticUpdate {
    pub id: String,
    pub key: String,
    pub previous: Option<Value>,
    pub next: Value,
    pub created_at: Instant,
    /// Application order within the manager.
    pub seq: u64,
    pub committed: bool,
    /// TTL and age the previous value had, so a rollback keeps its staleness.
    displaced: Option<(Duration, Duration)>,
}

/// Applies speculative transforms to [`ReadCache`] entries and undoes them.
pub struct OptimisticManager {
    cache: Arc<ReadCache>,
    pending: Mutex<HashMap<String, OptimisticUpdate>>,
    seq: AtomicU64,
}

impl OptimisticManager {
    pub fn new(cache: Arc<ReadCache>) -> Self {
        Self {
            cache,
            pending: Mutex::new(HashMap::new()),
            seq: AtomicU64::new(0),
        }
    }

    pub fn cache(&self) -> &Arc<ReadCache> {
        &self.cache
    }

    /// Runs `updater` on a copy of the value cached under `key` (or `None`)
    /// and writes the result. Returns the id to commit or revert with.
    ///
    /// Nothing is written if the updater fails.
    pub fn apply<F, E>(&self, key: &str, updater: F) -> Result<String>
    where
        F: FnOnce(Option<Value>) -> std::result::Result<Value, E>,
        E: fmt::Display,
    {
        let displaced = self.cache.entry(key);
        let previous = displaced.as_ref().map(|c| c.value.clone());
        let next = updater(previous.clone()).map_err(|e| Error::Updater(e.to_string()))?;

        self.cache.set(key, next.clone(), OPTIMISTIC_TTL);
        let id = generate_id();
        debug!("Optimistic {} applied to {}", id, key);
        self.lock().insert(
            id.clone(),
            OptimisticUpdate {
                id: id.clone(),
                key: key.to_string(),
                previous,
                next,
                created_at: Instant::now(),
                seq: self.seq.fetch_add(1, Ordering::SeqCst),
                committed: false,
                displaced: displaced.map(|CachedValue { ttl, age, .. }| (ttl, age)),
            },
        );
        Ok(id)
    }

    /// Restores the value that was cached before `update_id` was applied.
    /// Unknown ids are logged and ignored; returns whether anything was reverted.
    pub fn revert(&self, update_id: &str) -> bool {
        let Some(update) = self.lock().remove(update_id) else {
            warn!("Optimistic update {} not found, nothing to revert", update_id);
            return false;
        };
        self.restore(&update);
        true
    }

    /// Accepts the speculative value as authoritative and forgets the update.
    pub fn commit(&self, update_id: &str) -> bool {
        match self.lock().remove(update_id) {
            Some(mut update) => {
                update.committed = true;
                debug!("Optimistic {} committed on {}", update.id, update.key);
                true
            }
            None => {
                warn!("Optimistic update {} not found, nothing to commit", update_id);
                false
            }
        }
    }

    /// Rolls back every pending update, newest first.
    pub fn revert_all(&self) -> usize {
        let mut updates: Vec<OptimisticUpdate> = self.lock().drain().map(|(_, u)| u).collect();
        updates.sort_by(|a, b| b.seq.cmp(&a.seq));
        for update in &updates {
            self.restore(update);
        }
        updates.len()
    }

    /// Forgets every pending update without touching the cache.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn pending(&self) -> Vec<OptimisticUpdate> {
        self.lock().values().cloned().collect()
    }

    pub fn get(&self, update_id: &str) -> Option<OptimisticUpdate> {
        self.lock().get(update_id).cloned()
    }

    fn restore(&self, update: &OptimisticUpdate) {
        match (&update.previous, update.displaced) {
            (Some(previous), Some((ttl, age))) => {
                self.cache.restore(&update.key, previous.clone(), ttl, age);
            }
            _ => {
                self.cache.clear(&update.key);
            }
        }
        debug!("Optimistic {} reverted on {}", update.id, update.key);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, OptimisticUpdate>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}
