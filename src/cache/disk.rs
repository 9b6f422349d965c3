use crate::cache::Cache;
use anyhow::{Context as AnyhowContext, Result, anyhow};
use async_trait::async_trait;
use dashmap::DashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

/// On-disk cache laid out as `<root>/<hash[0..2]>/<hash>`.
pub struct DiskCache {
    root: PathBuf,
    // Per-key write locks; different keys never contend.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl DiskCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: DashMap::new(),
        }
    }

    /// `<platform cache dir>/skein`, or `./.skein-cache` when the platform has none.
    pub fn default_root() -> PathBuf {
        dirs::cache_dir()
            .map(|dir| dir.join("skein"))
            .unwrap_or_else(|| PathBuf::from(".skein-cache"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, hash: &str) -> Result<PathBuf> {
        let valid = !hash.is_empty()
            && hash
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(anyhow!("refusing to cache under invalid hash {:?}", hash));
        }
        let shard = hash.get(..2).unwrap_or(hash);
        Ok(self.root.join(shard).join(hash))
    }

    /// Number of hashes with an operation in flight.
    pub fn active_locks(&self) -> usize {
        self.locks.len()
    }

    fn lock_for<'a>(&'a self, hash: &'a str) -> KeyLock<'a> {
        let lock = self
            .locks
            .entry(hash.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        KeyLock {
            locks: &self.locks,
            hash,
            lock,
        }
    }
}

/// Handle on one hash's lock. Dropping the last handle removes the map entry.
struct KeyLock<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    hash: &'a str,
    lock: Arc<Mutex<()>>,
}

impl KeyLock<'_> {
    async fn acquire(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

impl Drop for KeyLock<'_> {
    fn drop(&mut self) {
        // Held only by the map and this handle.
        self.locks
            .remove_if(self.hash, |_, lock| Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) == 2);
    }
}

#[async_trait]
impl Cache for DiskCache {
    async fn get(&self, hash: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(hash)?;
        let key = self.lock_for(hash);
        let _guard = key.acquire().await;

        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read cache entry {}", path.display())),
        }
    }

    async fn put(&self, hash: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(hash)?;
        let key = self.lock_for(hash);
        let _guard = key.acquire().await;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create cache dir {}", dir.display()))?;
        }

        // Write beside the target and rename so readers never see a partial file.
        let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4()));
        fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("Failed to write cache entry {}", tmp.display()))?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e).with_context(|| format!("Failed to commit cache entry {}", path.display()));
        }

        debug!(hash, bytes = bytes.len(), "Cached on disk");
        Ok(())
    }

    async fn remove(&self, hash: &str) -> Result<()> {
        let path = self.path_for(hash)?;
        let key = self.lock_for(hash);
        let _guard = key.acquire().await;

        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove cache entry {}", path.display())),
        }
    }

    async fn contains(&self, hash: &str) -> Result<bool> {
        let path = self.path_for(hash)?;
        Ok(fs::try_exists(&path).await.unwrap_or(false))
    }
}
