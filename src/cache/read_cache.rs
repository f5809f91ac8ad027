use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use crate::cache::pattern;
use crate::engine::DurableSlot;
use crate::Result;

/// TTL used by callers that do not pick one.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Slot key cache entries are promoted under.
pub const CACHE_STORAGE_KEY: &str = "dispatch-read-cache";

/// How the cache bounds its size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Entries live until cleared. TTL only drives staleness.
    #[default]
    Unbounded,
    /// Evicts the least recently read or written entry beyond `max_entries`.
    Lru { max_entries: usize },
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    ttl: Duration,
    written_at: Instant,
    /// Age the entry already had when it was restored from a durable slot.
    prior_age: Duration,
    version: u64,
    last_access: u64,
}

impl CacheEntry {
    fn age(&self) -> Duration {
        self.written_at.elapsed() + self.prior_age
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    version: u64,
    tick: u64,
    /// Version counter at the last `clear` of each key.
    key_floors: HashMap<String, u64>,
    /// Version counter at the last `clear_pattern` of each pattern.
    pattern_floors: HashMap<String, u64>,
    cleared_all_at: u64,
}

impl CacheState {
    fn next_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Highest version invalidated for `key`. Reserved writes at or below it
    /// were started before the invalidation and must not land.
    fn floor(&self, key: &str) -> u64 {
        let by_key = self.key_floors.get(key).copied().unwrap_or(0);
        let by_pattern = self
            .pattern_floors
            .iter()
            .filter(|(pattern, _)| pattern::matches(pattern, key))
            .map(|(_, v)| *v)
            .max()
            .unwrap_or(0);
        self.cleared_all_at.max(by_key).max(by_pattern)
    }
}

/// A cached value with its freshness bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue {
    pub value: Value,
    pub ttl: Duration,
    pub age: Duration,
}

#[derive(Serialize, Deserialize)]
struct PersistedEntry {
    value: Value,
    ttl_ms: u64,
    written_at_ms: i64,
}

/// Key to value memoization of fetch results, with staleness tracking.
///
/// Every write is stamped with a version drawn from one monotonic counter.
/// Writers that may be overtaken (background revalidations) reserve a version
/// before they start and land through [`ReadCache::set_if_newer`]. Clearing a
/// key or pattern records the counter as a floor, so a write reserved before
/// the invalidation is dropped instead of restoring pre-invalidation data.
pub struct ReadCache {
    state: Mutex<CacheState>,
    policy: EvictionPolicy,
}

impl Default for ReadCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadCache {
    pub fn new() -> Self {
        Self::with_policy(EvictionPolicy::Unbounded)
    }

    pub fn with_policy(policy: EvictionPolicy) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            policy,
        }
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Stores `value` under `key` and returns the version it was written with.
    pub fn set(&self, key: &str, value: Value, ttl: Duration) -> u64 {
        let mut state = self.lock();
        let version = state.next_version();
        Self::write(&mut state, key, value, ttl, version);
        self.evict(&mut state);
        version
    }

    /// Takes a version for a write that will happen later.
    pub fn reserve_version(&self) -> u64 {
        self.lock().next_version()
    }

    /// Writes only if nothing newer than `version` has been stored under `key`
    /// and `key` has not been invalidated since `version` was reserved.
    pub fn set_if_newer(&self, key: &str, value: Value, ttl: Duration, version: u64) -> bool {
        let mut state = self.lock();
        if let Some(current) = state.entries.get(key) {
            if current.version >= version {
                debug!("Cache DROP {} (v{} <= v{})", key, version, current.version);
                return false;
            }
        }
        let floor = state.floor(key);
        if version <= floor {
            debug!("Cache DROP {} (v{} invalidated at v{})", key, version, floor);
            return false;
        }
        Self::write(&mut state, key, value, ttl, version);
        self.evict(&mut state);
        true
    }

    /// Puts back a value that was displaced, keeping the age it had so a
    /// stale entry stays stale.
    pub fn restore(&self, key: &str, value: Value, ttl: Duration, age: Duration) -> u64 {
        let mut state = self.lock();
        let version = state.next_version();
        Self::write(&mut state, key, value, ttl, version);
        if let Some(entry) = state.entries.get_mut(key) {
            entry.prior_age = age;
        }
        self.evict(&mut state);
        version
    }

    /// Returns the cached value without checking staleness.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut state = self.lock();
        let tick = state.next_tick();
        match state.entries.get_mut(key) {
            Some(entry) => {
                entry.last_access = tick;
                debug!("Cache HIT {}", key);
                Some(entry.value.clone())
            }
            None => {
                debug!("Cache MISS {}", key);
                None
            }
        }
    }

    /// Like [`ReadCache::get`], with the entry's TTL and current age.
    pub fn entry(&self, key: &str) -> Option<CachedValue> {
        let mut state = self.lock();
        let tick = state.next_tick();
        state.entries.get_mut(key).map(|entry| {
            entry.last_access = tick;
            CachedValue {
                value: entry.value.clone(),
                ttl: entry.ttl,
                age: entry.age(),
            }
        })
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// True if `key` is absent or was written at least `ttl` ago.
    pub fn is_stale(&self, key: &str, ttl: Duration) -> bool {
        match self.lock().entries.get(key) {
            Some(entry) => entry.age() >= ttl,
            None => true,
        }
    }

    /// Age of the entry under `key`.
    pub fn age(&self, key: &str) -> Option<Duration> {
        self.lock().entries.get(key).map(CacheEntry::age)
    }

    /// Version the entry under `key` was written with.
    pub fn version(&self, key: &str) -> Option<u64> {
        self.lock().entries.get(key).map(|e| e.version)
    }

    pub fn clear(&self, key: &str) -> bool {
        let mut state = self.lock();
        let floor = state.version;
        state.key_floors.insert(key.to_string(), floor);
        state.entries.remove(key).is_some()
    }

    /// Removes every key matching `pattern` (`*` matches any run of
    /// characters) and returns how many were removed.
    pub fn clear_pattern(&self, pattern: &str) -> usize {
        let mut state = self.lock();
        let floor = state.version;
        state.pattern_floors.insert(pattern.to_string(), floor);
        let before = state.entries.len();
        state.entries.retain(|key, _| !pattern::matches(pattern, key));
        let removed = before - state.entries.len();
        debug!("Cache CLEAR {} removed {}", pattern, removed);
        removed
    }

    pub fn clear_all(&self) {
        let mut state = self.lock();
        state.cleared_all_at = state.version;
        // every recorded floor is at or below the new one
        state.key_floors.clear();
        state.pattern_floors.clear();
        state.entries.clear();
    }

    /// Drops every entry older than `max_age` and returns how many went.
    pub fn sweep(&self, max_age: Duration) -> usize {
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.age() < max_age);
        before - state.entries.len()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Promotes every entry into `slot` so a later process can start warm.
    pub async fn persist(&self, slot: &dyn DurableSlot, storage_key: &str) -> Result<()> {
        let blob = {
            let state = self.lock();
            let now_ms = Utc::now().timestamp_millis();
            let entries: BTreeMap<&String, PersistedEntry> = state
                .entries
                .iter()
                .map(|(key, entry)| {
                    let persisted = PersistedEntry {
                        value: entry.value.clone(),
                        ttl_ms: entry.ttl.as_millis() as u64,
                        written_at_ms: now_ms - entry.age().as_millis() as i64,
                    };
                    (key, persisted)
                })
                .collect();
            serde_json::to_string(&entries)?
        };
        slot.write(storage_key, &blob).await
    }

    /// Restores entries promoted by [`ReadCache::persist`], keeping their age
    /// so staleness carries over. Returns how many entries were restored;
    /// unreadable data is logged and skipped.
    pub async fn hydrate(&self, slot: &dyn DurableSlot, storage_key: &str) -> Result<usize> {
        let Some(blob) = slot.read(storage_key).await? else {
            return Ok(0);
        };
        let persisted: HashMap<String, PersistedEntry> = match serde_json::from_str(&blob) {
            Ok(p) => p,
            Err(e) => {
                warn!("Could not parse cached entries from {}: {}", storage_key, e);
                return Ok(0);
            }
        };

        let now_ms = Utc::now().timestamp_millis();
        let mut state = self.lock();
        let mut restored = 0;
        for (key, entry) in persisted {
            if state.entries.contains_key(&key) {
                continue;
            }
            let version = state.next_version();
            let tick = state.next_tick();
            state.entries.insert(
                key,
                CacheEntry {
                    value: entry.value,
                    ttl: Duration::from_millis(entry.ttl_ms),
                    written_at: Instant::now(),
                    prior_age: Duration::from_millis((now_ms - entry.written_at_ms).max(0) as u64),
                    version,
                    last_access: tick,
                },
            );
            restored += 1;
        }
        self.evict(&mut state);
        Ok(restored)
    }

    fn write(state: &mut CacheState, key: &str, value: Value, ttl: Duration, version: u64) {
        let tick = state.next_tick();
        state.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                ttl,
                written_at: Instant::now(),
                prior_age: Duration::ZERO,
                version,
                last_access: tick,
            },
        );
        debug!("Cache PUT {} v{}", key, version);
    }

    fn evict(&self, state: &mut CacheState) {
        let EvictionPolicy::Lru { max_entries } = self.policy else {
            return;
        };
        while state.entries.len() > max_entries {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    debug!("Cache EVICT {}", key);
                    state.entries.remove(&key);
                }
                None => break,
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
