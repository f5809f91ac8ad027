use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::debug;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::fetch::{unwrap_response, ErrorKind, FetchClient, FetchError, Fetcher};

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// How long a cached value counts as fresh. Falls back to the client default.
    pub ttl: Option<Duration>,
    /// Disabled observers never fetch on [`QueryObserver::start`].
    pub disabled: bool,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.disabled = !enabled;
        self
    }
}

/// `Success` and `Error` are the idle states reached after a fetch settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Idle,
    Loading,
    Success,
    Error,
}

/// What a consumer renders: the latest data, the latest error and the
/// `loading`/`stale` flags, which move independently.
#[derive(Debug, Clone, Default)]
pub struct QuerySnapshot {
    pub data: Option<Value>,
    pub error: Option<FetchError>,
    pub loading: bool,
    pub stale: bool,
}

impl QuerySnapshot {
    pub fn status(&self) -> QueryStatus {
        if self.loading {
            QueryStatus::Loading
        } else if self.error.is_some() {
            QueryStatus::Error
        } else if self.data.is_some() {
            QueryStatus::Success
        } else {
            QueryStatus::Idle
        }
    }
}

struct ObserverInner {
    client: FetchClient,
    key: String,
    fetcher: Fetcher,
    options: QueryOptions,
    state: Mutex<QuerySnapshot>,
    alive: AtomicBool,
    background: Mutex<Option<JoinHandle<()>>>,
}

/// One consumer of a cached read.
#[derive(Clone)]
pub struct QueryObserver {
    inner: Arc<ObserverInner>,
}

impl QueryObserver {
    pub(crate) fn new(client: FetchClient, key: String, fetcher: Fetcher, options: QueryOptions) -> Self {
        Self {
            inner: Arc::new(ObserverInner {
                client,
                key,
                fetcher,
                options,
                state: Mutex::new(QuerySnapshot::default()),
                alive: AtomicBool::new(true),
                background: Mutex::new(None),
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn snapshot(&self) -> QuerySnapshot {
        self.inner.state().clone()
    }

    /// First enablement. A fresh cache hit is served as is; a stale hit is
    /// served flagged `stale` while a background fetch runs; a miss fetches
    /// before returning.
    pub async fn start(&self) -> QuerySnapshot {
        if self.inner.options.disabled {
            return self.snapshot();
        }
        let cache = self.inner.client.cache();
        let key = &self.inner.key;

        if let Some(cached) = cache.get(key) {
            let stale = cache.is_stale(key, self.inner.ttl());
            self.inner.update(|s| {
                s.data = Some(cached);
                s.error = None;
                s.stale = stale;
            });
            if stale {
                debug!("Serving stale {} while revalidating", key);
                self.revalidate();
            }
            return self.snapshot();
        }
        self.refresh().await
    }

    /// Fetches now and returns the resulting snapshot. Errors land in the snapshot.
    pub async fn refresh(&self) -> QuerySnapshot {
        let _ = self.inner.run().await;
        self.snapshot()
    }

    /// Fetches now and returns the value, or the normalized error.
    ///
    /// `Ok(None)` means a fetch for the same key was already running; the
    /// result will show up in the cache when it finishes.
    pub async fn refetch(&self) -> Result<Option<Value>, FetchError> {
        self.inner.run().await
    }

    /// Starts a fetch without waiting for it.
    pub fn revalidate(&self) {
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let _ = inner.run().await;
        });
        // an older task keeps running detached; `settled` only awaits the newest
        *self.inner.background.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    /// Waits for the latest background fetch, if any.
    pub async fn settled(&self) {
        let handle = self
            .inner
            .background
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Detaches the consumer. Fetches still running will update the cache but
    /// no longer this observer's state.
    pub fn teardown(&self) {
        self.inner.alive.store(false, Ordering::SeqCst);
    }

    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::SeqCst)
    }
}

impl ObserverInner {
    fn ttl(&self) -> Duration {
        self.options.ttl.unwrap_or_else(|| self.client.default_ttl())
    }

    fn state(&self) -> MutexGuard<'_, QuerySnapshot> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn update(&self, f: impl FnOnce(&mut QuerySnapshot)) {
        if self.alive.load(Ordering::SeqCst) {
            f(&mut self.state());
        }
    }

    async fn run(&self) -> Result<Option<Value>, FetchError> {
        let Some(_in_flight) = self.client.begin_fetch(&self.key) else {
            debug!("Fetch for {} already in flight, skipping", self.key);
            return Ok(None);
        };
        let cache = self.client.cache();
        self.update(|s| s.loading = true);

        let version = cache.reserve_version();
        let outcome = (self.fetcher)()
            .await
            .and_then(|value| unwrap_response(value, ErrorKind::Query));

        match outcome {
            Ok(value) => {
                let ttl = self.ttl();
                let landed = cache.set_if_newer(&self.key, value.clone(), ttl, version);
                // a newer write (an optimistic update) wins over this result;
                // an invalidation since the fetch started leaves it stale
                let (current, stale) = match cache.get(&self.key) {
                    Some(current) => {
                        let stale = !landed && cache.is_stale(&self.key, ttl);
                        (current, stale)
                    }
                    None => (value, true),
                };
                self.update(|s| {
                    s.data = Some(current.clone());
                    s.error = None;
                    s.stale = stale;
                    s.loading = false;
                });
                debug!("Fetched {}", self.key);
                Ok(Some(current))
            }
            Err(e) => {
                let err = FetchError::from(e);
                debug!("Fetch for {} failed: {}", self.key, err);
                self.update(|s| {
                    s.error = Some(err.clone());
                    s.loading = false;
                });
                Err(err)
            }
        }
    }
}
