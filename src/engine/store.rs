use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::engine::filter::{apply_filters, Filter};
use crate::engine::persistence::DurableSlot;
use crate::engine::query::Collection;
use crate::engine::record::{apply_patch, stamp_new, Record};
use crate::engine::seed;
use crate::Result;

/// Every collection, keyed by name.
pub type Collections = BTreeMap<String, Vec<Record>>;

/// Slot key the store is persisted under unless configured otherwise.
pub const DEFAULT_STORAGE_KEY: &str = "dispatch-local-db";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Insert,
    Update,
    Delete,
}

/// Delivered to subscribers after a write. `old` is empty for inserts and
/// `new` is empty for deletes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    pub collection: String,
    pub event_type: EventType,
    pub old: Record,
    pub new: Record,
}

pub type ChangeHandler = Arc<dyn Fn(&ChangeEvent) -> Result<()> + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    by_collection: HashMap<String, Vec<(u64, ChangeHandler)>>,
}

/// Handle returned by [`Store::subscribe`].
pub struct Subscription {
    registry: Weak<Mutex<Subscribers>>,
    collection: String,
    id: u64,
}

impl Subscription {
    /// Removes the handler. Calling it again, or after the store is gone, does nothing.
    pub fn unsubscribe(&self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut subs = lock(&registry);
        if let Some(handlers) = subs.by_collection.get_mut(&self.collection) {
            handlers.retain(|(id, _)| *id != self.id);
        }
    }
}

struct StoreInner {
    collections: RwLock<Collections>,
    subscribers: Arc<Mutex<Subscribers>>,
    slot: Option<Arc<dyn DurableSlot>>,
    storage_key: String,
    /// Held across snapshot and slot write so blobs land in write order.
    persist_lock: tokio::sync::Mutex<()>,
}

/// The embedded document store.
///
/// Cloning a `Store` yields another handle to the same collections and
/// subscribers; hand it to every consumer instead of reaching for a global.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    pub fn new(
        initial_data: Collections,
        slot: Option<Arc<dyn DurableSlot>>,
        storage_key: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                collections: RwLock::new(initial_data),
                subscribers: Arc::new(Mutex::new(Subscribers::default())),
                slot,
                storage_key: storage_key.into(),
                persist_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// An empty, non-durable store.
    pub fn in_memory() -> Self {
        Self::new(Collections::new(), None, DEFAULT_STORAGE_KEY)
    }

    /// Opens a store backed by `slot`, restoring whatever was persisted under
    /// `storage_key`. Missing or unreadable data falls back to the demo dataset.
    pub async fn open(slot: Arc<dyn DurableSlot>, storage_key: impl Into<String>) -> Self {
        let storage_key = storage_key.into();
        let initial = match Self::load(slot.as_ref(), &storage_key).await {
            Some(data) => {
                info!("Restored {} collections from slot {}", data.len(), storage_key);
                data
            }
            None => {
                info!("Seeding demonstration data into {}", storage_key);
                seed::demo_collections()
            }
        };
        Self::new(initial, Some(slot), storage_key)
    }

    async fn load(slot: &dyn DurableSlot, storage_key: &str) -> Option<Collections> {
        let blob = match slot.read(storage_key).await {
            Ok(Some(blob)) => blob,
            Ok(None) => return None,
            Err(e) => {
                warn!("Could not read slot {}: {}", storage_key, e);
                return None;
            }
        };
        match serde_json::from_str(&blob) {
            Ok(data) => Some(data),
            Err(e) => {
                warn!("Could not parse stored collections from {}: {}", storage_key, e);
                None
            }
        }
    }

    pub fn storage_key(&self) -> &str {
        &self.inner.storage_key
    }

    /// Returns a handle for building queries against `name`, creating the
    /// collection if it does not exist yet.
    pub fn collection(&self, name: &str) -> Collection {
        self.write_collections().entry(name.to_string()).or_default();
        Collection::new(self.clone(), name)
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.read_collections().keys().cloned().collect()
    }

    /// A deep copy of every collection.
    pub fn snapshot(&self) -> Collections {
        self.read_collections().clone()
    }

    /// Serializes every collection the same way they are persisted.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&*self.read_collections())?)
    }

    /// Registers `handler` for writes to `collection`. Handlers run in
    /// registration order after the write has been applied.
    pub fn subscribe<F>(&self, collection: &str, handler: F) -> Subscription
    where
        F: Fn(&ChangeEvent) -> Result<()> + Send + Sync + 'static,
    {
        let mut subs = lock(&self.inner.subscribers);
        subs.next_id += 1;
        let id = subs.next_id;
        subs.by_collection
            .entry(collection.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription {
            registry: Arc::downgrade(&self.inner.subscribers),
            collection: collection.to_string(),
            id,
        }
    }

    /// Replaces every collection with the demonstration dataset.
    pub async fn reset(&self) {
        *self.write_collections() = seed::demo_collections();
        info!("Store {} reset to demonstration data", self.inner.storage_key);
        self.persist().await;
    }

    pub(crate) fn read_rows(&self, name: &str) -> Vec<Record> {
        self.write_collections().entry(name.to_string()).or_default().clone()
    }

    pub(crate) async fn insert_rows(&self, name: &str, rows: Vec<Record>) -> Vec<Record> {
        let inserted: Vec<Record> = rows.into_iter().map(stamp_new).collect();
        {
            let mut data = self.write_collections();
            data.entry(name.to_string())
                .or_default()
                .extend(inserted.iter().cloned());
        }
        self.persist().await;
        let events = inserted
            .iter()
            .map(|row| ChangeEvent {
                collection: name.to_string(),
                event_type: EventType::Insert,
                old: Record::new(),
                new: row.clone(),
            })
            .collect();
        self.notify(name, events);
        inserted
    }

    pub(crate) async fn update_rows(&self, name: &str, filters: &[Filter], patch: &Record) -> Vec<Record> {
        let mut events = Vec::new();
        {
            let mut data = self.write_collections();
            let rows = data.entry(name.to_string()).or_default();
            for row in rows.iter_mut() {
                if filters.iter().all(|f| f.matches(row)) {
                    let next = apply_patch(row, patch);
                    let old = std::mem::replace(row, next.clone());
                    events.push(ChangeEvent {
                        collection: name.to_string(),
                        event_type: EventType::Update,
                        old,
                        new: next,
                    });
                }
            }
        }
        if !events.is_empty() {
            self.persist().await;
        }
        let updated = events.iter().map(|e| e.new.clone()).collect();
        self.notify(name, events);
        updated
    }

    pub(crate) async fn delete_rows(&self, name: &str, filters: &[Filter]) -> Vec<Record> {
        let removed = {
            let mut data = self.write_collections();
            let rows = data.entry(name.to_string()).or_default();
            let removed = apply_filters(rows, filters);
            rows.retain(|row| !filters.iter().all(|f| f.matches(row)));
            removed
        };
        if !removed.is_empty() {
            self.persist().await;
        }
        let events = removed
            .iter()
            .map(|row| ChangeEvent {
                collection: name.to_string(),
                event_type: EventType::Delete,
                old: row.clone(),
                new: Record::new(),
            })
            .collect();
        self.notify(name, events);
        removed
    }

    async fn persist(&self) {
        let Some(slot) = &self.inner.slot else {
            return;
        };
        let _guard = self.inner.persist_lock.lock().await;
        let blob = match self.to_json() {
            Ok(b) => b,
            Err(e) => {
                error!("Failed to serialize store {}: {}", self.inner.storage_key, e);
                return;
            }
        };
        if let Err(e) = slot.write(&self.inner.storage_key, &blob).await {
            error!("Failed to persist store {}: {}", self.inner.storage_key, e);
        }
    }

    /// Runs once the write lock is released, so handlers may write back into the store.
    fn notify(&self, name: &str, events: Vec<ChangeEvent>) {
        if events.is_empty() {
            return;
        }
        let handlers: Vec<(u64, ChangeHandler)> = {
            let subs = lock(&self.inner.subscribers);
            subs.by_collection.get(name).cloned().unwrap_or_default()
        };
        for event in &events {
            debug!("{:?} on {} -> {} subscribers", event.event_type, name, handlers.len());
            for (id, handler) in &handlers {
                match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!("Subscriber {} on {} failed: {}", id, name, e),
                    Err(_) => error!("Subscriber {} on {} panicked", id, name),
                }
            }
        }
    }

    fn read_collections(&self) -> RwLockReadGuard<'_, Collections> {
        self.inner.collections.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_collections(&self) -> RwLockWriteGuard<'_, Collections> {
        self.inner.collections.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
