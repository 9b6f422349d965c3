use crate::cache::{Cache, DiskCache, InMemoryCache, RedisCache};
use crate::config::{CacheKind, RuntimeConfig};
use crate::decode::{
    BlueprintDecoder, Decoder, JsonDecoder, MeshDecoder, MeshImport, RawDecoder, Texture, TextureDecoder,
};
use crate::download::{DefaultDownloader, Downloader, FileDownloader, HttpDownloader};
use crate::engine::{GraphEngine, GraphInstance};
use crate::error::{CatalogError, ResolveError};
use crate::loader::ResourceLoader;
use crate::resource::{Catalog, ResourceDescriptor, VersionRange};
use crate::runtime::node::NodeRegistry;
use anyhow::{Context as AnyhowContext, Result};
use serde::de::DeserializeOwned;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Registry of catalogs, downloaders and the active cache, shared by the
/// orchestrator and every node of a run.
///
/// Registration is a setup-time operation. Registering catalogs or
/// downloaders while graphs are executing is a precondition violation and
/// is not guarded against.
pub struct ArtifactProvider {
    catalog: RwLock<Catalog>,
    downloaders: RwLock<Vec<Arc<dyn Downloader>>>,
    fallback: Arc<dyn Downloader>,
    cache: Option<Arc<dyn Cache>>,
    blueprints: BlueprintDecoder,
    resolve_timeout: Option<Duration>,
}

impl ArtifactProvider {
    pub fn new(engine: Arc<dyn GraphEngine>, registry: Arc<NodeRegistry>) -> Self {
        Self {
            catalog: RwLock::new(Catalog::default()),
            downloaders: RwLock::new(Vec::new()),
            fallback: Arc::new(DefaultDownloader::default()),
            cache: None,
            blueprints: BlueprintDecoder::new(engine, registry, VersionRange::default()),
            resolve_timeout: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_fallback_downloader(mut self, downloader: Arc<dyn Downloader>) -> Self {
        self.fallback = downloader;
        self
    }

    pub fn with_supported_versions(mut self, range: VersionRange) -> Self {
        self.blueprints = self.blueprints.with_supported(range);
        self
    }

    pub fn with_resolve_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    /// Builds a provider from configuration: fallback downloader, cache
    /// back-end, supported versions, deadline and start-up catalogs.
    pub fn from_config(config: &RuntimeConfig, engine: Arc<dyn GraphEngine>, registry: Arc<NodeRegistry>) -> Result<Self> {
        let http = HttpDownloader::with_options(config.download.timeout(), config.download.user_agent.as_deref())
            .context("Failed to build HTTP client")?;
        let file = match &config.download.file_root {
            Some(root) => FileDownloader::with_root(root),
            None => FileDownloader::new(),
        };

        let mut provider = ArtifactProvider::new(engine, registry)
            .with_fallback_downloader(Arc::new(DefaultDownloader::new(http, file)))
            .with_supported_versions(config.versions)
            .with_resolve_timeout(config.resolve_timeout());

        let cache: Option<Arc<dyn Cache>> = match config.cache.kind {
            CacheKind::None => None,
            CacheKind::Memory => Some(Arc::new(InMemoryCache::new())),
            CacheKind::Disk => {
                let root = config.cache.path.clone().unwrap_or_else(DiskCache::default_root);
                info!(root = %root.display(), "Using disk cache");
                Some(Arc::new(DiskCache::new(root)))
            }
            CacheKind::Redis => {
                let url = config.cache.url.as_deref().unwrap_or("redis://127.0.0.1:6379/0");
                Some(Arc::new(RedisCache::open(url, config.cache.prefix.clone()).context("Invalid Redis URL")?))
            }
        };
        if let Some(cache) = cache {
            provider = provider.with_cache(cache);
        }

        for path in &config.catalogs {
            let catalog = Catalog::from_file(path).with_context(|| format!("Failed to load catalog {}", path.display()))?;
            provider.register_catalog(catalog);
        }

        Ok(provider)
    }

    pub fn engine(&self) -> &Arc<dyn GraphEngine> {
        self.blueprints.engine()
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        self.blueprints.registry()
    }

    pub fn supported_versions(&self) -> VersionRange {
        self.blueprints.supported()
    }

    pub fn cache(&self) -> Option<&Arc<dyn Cache>> {
        self.cache.as_ref()
    }

    // --- Registration ---

    /// Merges `catalog`; ids already registered keep their first descriptor.
    pub fn register_catalog(&self, catalog: Catalog) -> usize {
        let mut merged = self.catalog.write().unwrap_or_else(PoisonError::into_inner);
        let added = merged.merge(&catalog);
        info!(added, ignored = catalog.len() - added, "Catalog registered");
        added
    }

    pub fn register_catalog_json(&self, json: &str) -> Result<usize, CatalogError> {
        Ok(self.register_catalog(Catalog::from_json(json)?))
    }

    pub fn register_downloader(&self, downloader: Arc<dyn Downloader>) {
        debug!(downloader = downloader.name(), "Downloader registered");
        self.downloaders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(downloader);
    }

    // --- Lookup ---

    pub fn descriptor(&self, id: &str) -> Option<Arc<ResourceDescriptor>> {
        self.catalog
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn resource_ids(&self) -> Vec<String> {
        self.catalog
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|d| d.id().to_string())
            .collect()
    }

    /// First registered downloader accepting the descriptor, else the fallback.
    pub fn select_downloader(&self, descriptor: &ResourceDescriptor) -> Arc<dyn Downloader> {
        self.downloaders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|d| d.can_download(descriptor))
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }

    pub fn loader_for<D: Decoder>(&self, descriptor: &ResourceDescriptor, decoder: D) -> ResourceLoader<D> {
        ResourceLoader::new(self.select_downloader(descriptor), self.cache.clone(), decoder)
            .with_deadline(self.resolve_timeout)
    }

    fn lookup(&self, id: &str) -> Result<Arc<ResourceDescriptor>, ResolveError> {
        if id.is_empty() {
            return Err(ResolveError::EmptyId);
        }
        self.descriptor(id).ok_or_else(|| {
            warn!(resource = id, "Resource id not found in any catalog");
            ResolveError::UnknownId(id.to_string())
        })
    }

    // --- Resolution ---

    /// Resolves `id` with an arbitrary decoder. Unknown ids are reported, not panicked.
    pub async fn resolve<D: Decoder>(&self, id: &str, decoder: D) -> Result<D::Output, ResolveError> {
        let descriptor = self.lookup(id)?;
        self.loader_for(&descriptor, decoder).resolve(&descriptor).await
    }

    /// Callback form of [`resolve`](Self::resolve): `on_complete` receives
    /// `None` on any failure.
    pub async fn resolve_then<D, F>(&self, id: &str, decoder: D, on_complete: F)
    where
        D: Decoder,
        F: FnOnce(Option<D::Output>) + Send,
    {
        let result = self.resolve(id, decoder).await;
        if let Err(e) = &result {
            warn!(resource = id, error = %e, "Resolve failed");
        }
        on_complete(result.ok());
    }

    pub async fn resolve_texture(&self, id: &str) -> Result<Arc<Texture>, ResolveError> {
        self.resolve(id, TextureDecoder).await.map(Arc::new)
    }

    pub async fn resolve_mesh(&self, id: &str) -> Result<Arc<MeshImport>, ResolveError> {
        self.resolve(id, MeshDecoder).await.map(Arc::new)
    }

    pub async fn resolve_blueprint(&self, id: &str) -> Result<Arc<GraphInstance>, ResolveError> {
        self.resolve(id, self.blueprints.clone()).await
    }

    pub async fn resolve_bytes(&self, id: &str) -> Result<Vec<u8>, ResolveError> {
        self.resolve(id, RawDecoder).await
    }

    pub async fn resolve_json<T: DeserializeOwned + Send + 'static>(&self, id: &str) -> Result<T, ResolveError> {
        self.resolve(id, JsonDecoder::<T>::new()).await
    }

    /// Cache or download `id` without decoding it.
    pub async fn preload(&self, id: &str) -> Result<(), ResolveError> {
        let descriptor = self.lookup(id)?;
        self.loader_for(&descriptor, RawDecoder).preload(&descriptor).await
    }

    /// Preloads every catalogued resource. Returns the ids that failed.
    pub async fn preload_all(&self) -> Vec<(String, ResolveError)> {
        let mut failures = Vec::new();
        for id in self.resource_ids() {
            if let Err(e) = self.preload(&id).await {
                failures.push((id, e));
            }
        }
        failures
    }
}
