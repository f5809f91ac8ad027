//! Query and mutation orchestration over the read cache.
//!
//! A [`QueryObserver`] serves cached data, marks it stale once its TTL passes
//! and revalidates in the background. A [`MutationObserver`] runs a write,
//! optionally applying an optimistic cache transform first, and invalidates
//! cache keys once the write succeeds.

pub mod error;
pub mod mutation;
pub mod pagination;
pub mod query;

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use log::debug;
use serde_json::Value;

use crate::cache::{OptimisticManager, ReadCache, DEFAULT_TTL};
use crate::engine::Envelope;
use crate::{Error, Result};

pub use error::{ErrorKind, FetchError};
pub use mutation::{MutationObserver, MutationOptions, MutationSnapshot};
pub use pagination::{Page, PageRequest, PaginationMode, Paginator};
pub use query::{QueryObserver, QueryOptions, QuerySnapshot, QueryStatus};

/// A caller-supplied read. May resolve to a plain value or an [`Envelope`].
pub type Fetcher = Arc<dyn Fn() -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// A caller-supplied write, given the mutation variables.
pub type Mutator = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Wraps an async closure as a [`Fetcher`].
pub fn fetcher<F, Fut>(f: F) -> Fetcher
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// Wraps an async closure as a [`Mutator`].
pub fn mutator<F, Fut>(f: F) -> Mutator
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(move |vars| f(vars).boxed())
}

/// Unwraps envelope-shaped responses; anything else passes through untouched.
pub(crate) fn unwrap_response(value: Value, kind: ErrorKind) -> Result<Value> {
    match Envelope::from_value(&value) {
        Some(envelope) if envelope.success => Ok(envelope.data),
        Some(envelope) => {
            let message = envelope.error.unwrap_or_else(|| "request failed".to_string());
            Err(match kind {
                ErrorKind::Mutation => Error::Mutation(message),
                _ => Error::Query(message),
            })
        }
        None => Ok(value),
    }
}

/// Shared entry point for queries and mutations. Clones share the same cache,
/// optimistic manager and in-flight registry.
#[derive(Clone)]
pub struct FetchClient {
    cache: Arc<ReadCache>,
    optimistic: Arc<OptimisticManager>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    default_ttl: Duration,
}

impl FetchClient {
    pub fn new(cache: Arc<ReadCache>) -> Self {
        let optimistic = Arc::new(OptimisticManager::new(cache.clone()));
        Self {
            cache,
            optimistic,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            default_ttl: DEFAULT_TTL,
        }
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn cache(&self) -> &Arc<ReadCache> {
        &self.cache
    }

    pub fn optimistic(&self) -> &Arc<OptimisticManager> {
        &self.optimistic
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Creates an observer for the read cached under `key`.
    pub fn query(&self, key: impl Into<String>, fetcher: Fetcher, options: QueryOptions) -> QueryObserver {
        QueryObserver::new(self.clone(), key.into(), fetcher, options)
    }

    pub fn mutation(&self, mutator: Mutator, options: MutationOptions) -> MutationObserver {
        MutationObserver::new(self.clone(), mutator, options)
    }

    /// Clears exact `keys` and every key matching one of `patterns`.
    pub fn invalidate(&self, keys: &[String], patterns: &[String]) -> usize {
        let mut removed = 0;
        for key in keys {
            if self.cache.clear(key) {
                removed += 1;
            }
        }
        for pattern in patterns {
            removed += self.cache.clear_pattern(pattern);
        }
        debug!("Invalidated {} cache entries", removed);
        removed
    }

    pub fn is_fetching(&self, key: &str) -> bool {
        self.lock_in_flight().contains(key)
    }

    /// Marks `key` as being fetched. `None` if a fetch for it is already running.
    pub(crate) fn begin_fetch(&self, key: &str) -> Option<InFlight> {
        if !self.lock_in_flight().insert(key.to_string()) {
            return None;
        }
        Some(InFlight {
            registry: self.in_flight.clone(),
            key: key.to_string(),
        })
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashSet<String>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Clears the in-flight mark when dropped.
pub(crate) struct InFlight {
    registry: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut set = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.key);
    }
}
