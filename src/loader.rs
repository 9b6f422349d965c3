use crate::cache::Cache;
use crate::decode::Decoder;
use crate::download::Downloader;
use crate::error::ResolveError;
use crate::resource::ResourceDescriptor;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// 资源加载器 (Resource Loader)
/// One cache → download → cache-write → decode pipeline for a single
/// decoder type.
pub struct ResourceLoader<D> {
    downloader: Arc<dyn Downloader>,
    cache: Option<Arc<dyn Cache>>,
    decoder: D,
    deadline: Option<Duration>,
}

impl<D: Decoder> ResourceLoader<D> {
    pub fn new(downloader: Arc<dyn Downloader>, cache: Option<Arc<dyn Cache>>, decoder: D) -> Self {
        Self {
            downloader,
            cache,
            decoder,
            deadline: None,
        }
    }

    /// Bounds each whole resolve, fetch and decode included.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub async fn resolve(&self, descriptor: &ResourceDescriptor) -> Result<D::Output, ResolveError> {
        self.bounded(descriptor, async {
            let bytes = self.fetch(descriptor).await?;
            self.decoder.decode(descriptor, bytes).await
        })
        .await
    }

    /// Cache or download only, no decode. For warming the cache.
    pub async fn preload(&self, descriptor: &ResourceDescriptor) -> Result<(), ResolveError> {
        self.bounded(descriptor, async { self.fetch(descriptor).await.map(|_| ()) })
            .await
    }

    async fn bounded<T>(
        &self,
        descriptor: &ResourceDescriptor,
        work: impl Future<Output = Result<T, ResolveError>>,
    ) -> Result<T, ResolveError> {
        match self.deadline {
            None => work.await,
            Some(deadline) => timeout(deadline, work).await.unwrap_or_else(|_| {
                warn!(resource = %descriptor.id(), ?deadline, "Resolve deadline exceeded");
                Err(ResolveError::DeadlineExceeded {
                    id: descriptor.id().to_string(),
                    timeout_ms: deadline.as_millis() as u64,
                })
            }),
        }
    }

    async fn fetch(&self, descriptor: &ResourceDescriptor) -> Result<Vec<u8>, ResolveError> {
        let cache = self.cache.as_ref().zip(descriptor.hash());

        if let Some((cache, hash)) = cache {
            match cache.get(hash).await {
                Ok(Some(bytes)) => {
                    debug!(resource = %descriptor.id(), hash, "Cache hit");
                    return Ok(bytes);
                }
                Ok(None) => {}
                Err(e) => warn!(resource = %descriptor.id(), hash, error = %e, "Cache read failed"),
            }
        }

        let bytes = self.downloader.download(descriptor).await.inspect_err(|e| {
            warn!(resource = %descriptor.id(), downloader = self.downloader.name(), error = %e, "Download failed");
        })?;

        // Written before decoding so a decode failure never costs a second download.
        if let Some((cache, hash)) = cache {
            if let Err(e) = cache.put(hash, &bytes).await {
                warn!(resource = %descriptor.id(), hash, error = %e, "Cache write failed");
            }
        }

        Ok(bytes)
    }
}
