use crate::cache::Cache;
use anyhow::Result;
use async_trait::async_trait;
use redis::AsyncCommands;

/// Shared byte cache backed by Redis string keys `<prefix>:<hash>`.
pub struct RedisCache {
    client: redis::Client,
    prefix: String,
}

impl RedisCache {
    pub fn new(client: redis::Client, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }

    pub fn open(url: &str, prefix: impl Into<String>) -> Result<Self> {
        Ok(Self::new(redis::Client::open(url)?, prefix))
    }

    fn key(&self, hash: &str) -> String {
        format!("{}:{}", self.prefix, hash)
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, hash: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let bytes: Option<Vec<u8>> = conn.get(self.key(hash)).await?;
        Ok(bytes)
    }

    async fn put(&self, hash: &str, bytes: &[u8]) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: () = conn.set(self.key(hash), bytes).await?;
        Ok(())
    }

    async fn remove(&self, hash: &str) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: () = conn.del(self.key(hash)).await?;
        Ok(())
    }

    async fn contains(&self, hash: &str) -> Result<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let exists: bool = conn.exists(self.key(hash)).await?;
        Ok(exists)
    }
}
