use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::{Error, Result};

/// A durable key-value location holding one serialized blob per key.
///
/// The [`Store`](crate::engine::Store) keeps its entire collection map under a
/// single key; the [`ReadCache`](crate::cache::ReadCache) can promote its
/// entries under another.
#[async_trait]
pub trait DurableSlot: Send + Sync {
    /// Reads the blob stored under `key`, or `None` if nothing was written yet.
    async fn read(&self, key: &str) -> Result<Option<String>>;
    /// Replaces the blob stored under `key`.
    async fn write(&self, key: &str, blob: &str) -> Result<()>;
}

/// Stores each key as `<key>.json` inside a data directory.
///
/// Writes go to a temporary file first and are then renamed over the final
/// destination, so a crash mid-write never leaves a truncated blob behind.
pub struct FileSlot {
    data_dir: PathBuf,
}

impl FileSlot {
    /// Opens a slot in the specified directory, creating it if needed.
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        Ok(Self { data_dir: dir })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(Error::Internal(format!("invalid storage key {:?}", key)));
        }
        Ok(self.data_dir.join(format!("{}.json", key)))
    }
}

#[async_trait]
impl DurableSlot for FileSlot {
    async fn read(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        let contents = tokio::task::spawn_blocking(move || match fs::read_to_string(&path) {
            Ok(c) => Ok(Some(c)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        })
        .await
        .map_err(|e| Error::Internal(e.to_string()))??;
        Ok(contents)
    }

    async fn write(&self, key: &str, blob: &str) -> Result<()> {
        let file_path = self.path_for(key)?;
        let temp_path = file_path.with_extension("json.tmp");
        let bytes = blob.as_bytes().to_vec();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            fs::write(&temp_path, bytes)?;
            fs::rename(&temp_path, &file_path)
        })
        .await
        .map_err(|e| Error::Internal(e.to_string()))??;
        Ok(())
    }
}

/// An in-process slot. Survives as long as the handle; used by tests and
/// ephemeral sessions.
#[derive(Clone, Default)]
pub struct MemorySlot {
    blobs: Arc<Mutex<HashMap<String, String>>>,
}

impl MemorySlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the raw blob under `key` without going through the async API.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.blobs.lock().ok()?.get(key).cloned()
    }

    /// Seeds a raw blob, bypassing any serializer. Handy for corrupt-data tests.
    pub fn put(&self, key: &str, blob: impl Into<String>) {
        if let Ok(mut blobs) = self.blobs.lock() {
            blobs.insert(key.to_string(), blob.into());
        }
    }
}

#[async_trait]
impl DurableSlot for MemorySlot {
    async fn read(&self, key: &str) -> Result<Option<String>> {
        let blobs = self
            .blobs
            .lock()
            .map_err(|_| Error::Internal("memory slot lock poisoned".to_string()))?;
        Ok(blobs.get(key).cloned())
    }

    async fn write(&self, key: &str, blob: &str) -> Result<()> {
        let mut blobs = self
            .blobs
            .lock()
            .map_err(|_| Error::Internal("memory slot lock poisoned".to_string()))?;
        blobs.insert(key.to_string(), blob.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_slot_write_and_read() {
        let dir = tempdir().unwrap();
        let slot = FileSlot::new(dir.path()).unwrap();

        assert_eq!(slot.read("dispatch-db").await.unwrap(), None);
        slot.write("dispatch-db", r#"{"orders":[]}"#).await.unwrap();
        assert_eq!(
            slot.read("dispatch-db").await.unwrap().as_deref(),
            Some(r#"{"orders":[]}"#)
        );
    }

    #[tokio::test]
    async fn test_atomic_rename() {
        let dir = tempdir().unwrap();
        let slot = FileSlot::new(dir.path()).unwrap();
        slot.write("dispatch-db", "{}").await.unwrap();

        assert!(dir.path().join("dispatch-db.json").exists());
        assert!(!dir.path().join("dispatch-db.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_creates_missing_directory() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let slot = FileSlot::new(&nested).unwrap();
        slot.write("k", "1").await.unwrap();
        assert!(nested.join("k.json").exists());
    }

    #[tokio::test]
    async fn test_rejects_path_like_keys() {
        let dir = tempdir().unwrap();
        let slot = FileSlot::new(dir.path()).unwrap();
        assert!(slot.write("../escape", "{}").await.is_err());
        assert!(slot.read("").await.is_err());
    }

    #[tokio::test]
    async fn test_memory_slot_shares_state_between_clones() {
        let slot = MemorySlot::new();
        let other = slot.clone();
        slot.write("k", "v").await.unwrap();
        assert_eq!(other.read("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(other.peek("k").as_deref(), Some("v"));
    }
}
