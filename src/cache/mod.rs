use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

pub mod disk;
pub mod redis_cache;

pub use self::disk::DiskCache;
pub use self::redis_cache::RedisCache;

/// 字节缓存 (Byte Cache)
/// Content-addressed byte store keyed by a resource's hash.
///
/// Implementations only need to be idempotent per key; operations on
/// different keys may run concurrently.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, hash: &str) -> Result<Option<Vec<u8>>>;
    async fn put(&self, hash: &str, bytes: &[u8]) -> Result<()>;
    async fn remove(&self, hash: &str) -> Result<()>;

    async fn contains(&self, hash: &str) -> Result<bool> {
        Ok(self.get(hash).await?.is_some())
    }
}

#[derive(Default)]
pub struct InMemoryCache {
    entries: DashMap<String, Arc<Vec<u8>>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, hash: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(hash).map(|e| e.value().as_ref().clone()))
    }

    async fn put(&self, hash: &str, bytes: &[u8]) -> Result<()> {
        self.entries.insert(hash.to_string(), Arc::new(bytes.to_vec()));
        Ok(())
    }

    async fn remove(&self, hash: &str) -> Result<()> {
        self.entries.remove(hash);
        Ok(())
    }

    async fn contains(&self, hash: &str) -> Result<bool> {
        Ok(self.entries.contains_key(hash))
    }
}
