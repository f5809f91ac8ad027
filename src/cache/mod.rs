//! The read cache and the optimistic update manager layered on it.
pub mod optimistic;
pub mod pattern;
pub mod read_cache;

pub use optimistic::{OptimisticManager, OptimisticUpdate, OPTIMISTIC_TTL};
pub use read_cache::{CachedValue, EvictionPolicy, ReadCache, CACHE_STORAGE_KEY, DEFAULT_TTL};
