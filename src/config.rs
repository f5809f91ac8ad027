use std::env;
use std::path::PathBuf;
use std::time::Duration;

use log::warn;

use crate::cache::{EvictionPolicy, DEFAULT_TTL};
use crate::engine::DEFAULT_STORAGE_KEY;

pub const ENV_DATA_DIR: &str = "DISPATCH_DATA_DIR";
pub const ENV_STORAGE_KEY: &str = "DISPATCH_STORAGE_KEY";
pub const ENV_CACHE_TTL_MS: &str = "DISPATCH_CACHE_TTL_MS";
pub const ENV_CACHE_MAX_ENTRIES: &str = "DISPATCH_CACHE_MAX_ENTRIES";

/// Runtime settings for an [`Engine`](crate::sdk::Engine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory holding the durable slots.
    pub data_dir: PathBuf,
    /// Slot key the store is persisted under.
    pub storage_key: String,
    /// Default freshness window for cached reads.
    pub cache_ttl: Duration,
    /// Bounds the read cache with LRU eviction when set.
    pub cache_max_entries: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            cache_ttl: DEFAULT_TTL,
            cache_max_entries: None,
        }
    }
}

impl Config {
    /// Reads `DISPATCH_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Like [`Config::from_env`] with a custom variable source. Malformed
    /// numbers are logged and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(dir) = get(ENV_DATA_DIR) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(key) = get(ENV_STORAGE_KEY) {
            config.storage_key = key;
        }
        if let Some(raw) = get(ENV_CACHE_TTL_MS) {
            match raw.trim().parse::<u64>() {
                Ok(ms) => config.cache_ttl = Duration::from_millis(ms),
                Err(_) => warn!("Ignoring {}={:?}: not a number of milliseconds", ENV_CACHE_TTL_MS, raw),
            }
        }
        if let Some(raw) = get(ENV_CACHE_MAX_ENTRIES) {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.cache_max_entries = Some(n),
                _ => warn!("Ignoring {}={:?}: expected a positive integer", ENV_CACHE_MAX_ENTRIES, raw),
            }
        }
        config
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    pub fn eviction_policy(&self) -> EvictionPolicy {
        match self.cache_max_entries {
            Some(max_entries) => EvictionPolicy::Lru { max_entries },
            None => EvictionPolicy::Unbounded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[]));
        assert_eq!(config, Config::default());
        assert_eq!(config.eviction_policy(), EvictionPolicy::Unbounded);
    }

    #[test]
    fn test_reads_variables() {
        let config = Config::from_lookup(lookup(&[
            (ENV_DATA_DIR, "/tmp/dispatch"),
            (ENV_STORAGE_KEY, "console-db"),
            (ENV_CACHE_TTL_MS, "1500"),
            (ENV_CACHE_MAX_ENTRIES, "200"),
        ]));
        assert_eq!(config.data_dir, PathBuf::from("/tmp/dispatch"));
        assert_eq!(config.storage_key, "console-db");
        assert_eq!(config.cache_ttl, Duration::from_millis(1500));
        assert_eq!(config.eviction_policy(), EvictionPolicy::Lru { max_entries: 200 });
    }

    #[test]
    fn test_ignores_malformed_numbers() {
        let config = Config::from_lookup(lookup(&[
            (ENV_CACHE_TTL_MS, "soon"),
            (ENV_CACHE_MAX_ENTRIES, "0"),
            (ENV_DATA_DIR, "  "),
        ]));
        assert_eq!(config.cache_ttl, DEFAULT_TTL);
        assert_eq!(config.cache_max_entries, None);
        assert_eq!(config.data_dir, PathBuf::from("data"));
    }
}
