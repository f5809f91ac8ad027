use std::sync::Arc;

use log::info;

use crate::cache::{ReadCache, CACHE_STORAGE_KEY};
use crate::engine::{DurableSlot, FileSlot, Store};
use crate::fetch::FetchClient;
use crate::{Config, Result};

/// A store, read cache and fetch client wired to the same data directory.
#[derive(Clone)]
pub struct Engine {
    pub store: Store,
    pub client: FetchClient,
    slot: Arc<FileSlot>,
}

impl Engine {
    /// Promotes the read cache to disk so the next [`new`] starts warm.
    pub async fn persist_cache(&self) -> Result<()> {
        self.client.cache().persist(self.slot.as_ref(), CACHE_STORAGE_KEY).await
    }
}

/// Opens an [`Engine`] from `config`.
///
/// The store is restored from `<data_dir>/<storage_key>.json` (or seeded with
/// demonstration data) and the read cache is hydrated from whatever a previous
/// [`Engine::persist_cache`] left behind.
///
/// # Examples
///
/// ```no_run
/// use dispatch_store::{sdk, Config};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let engine = sdk::new(&Config::from_env()).await?;
///     let pending = engine.store.collection("orders").select().eq("status", "pending").await;
///     println!("{}", serde_json::to_string_pretty(&pending)?);
///     Ok(())
/// }
/// ```
pub async fn new(config: &Config) -> Result<Engine> {
    let slot = Arc::new(FileSlot::new(&config.data_dir)?);
    let store = Store::open(slot.clone() as Arc<dyn DurableSlot>, config.storage_key.clone()).await;

    let cache = Arc::new(ReadCache::with_policy(config.eviction_policy()));
    let restored = cache.hydrate(slot.as_ref(), CACHE_STORAGE_KEY).await?;
    info!(
        "Engine ready: {} collections, {} cached reads restored from {:?}",
        store.collection_names().len(),
        restored,
        config.data_dir
    );

    let client = FetchClient::new(cache).with_default_ttl(config.cache_ttl);
    Ok(Engine { store, client, slot })
}
