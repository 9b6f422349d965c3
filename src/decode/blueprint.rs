use crate::decode::Decoder;
use crate::engine::{GraphEngine, GraphInstance};
use crate::error::ResolveError;
use crate::resource::{ResourceDescriptor, SchemaVersion, VersionRange};
use crate::runtime::node::NodeRegistry;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Deserialize)]
struct VersionHeader {
    #[serde(default)]
    version: Option<String>,
}

/// Loads blueprint documents into the graph engine after checking their
/// declared schema version.
#[derive(Clone)]
pub struct BlueprintDecoder {
    engine: Arc<dyn GraphEngine>,
    registry: Arc<NodeRegistry>,
    supported: VersionRange,
}

impl BlueprintDecoder {
    pub fn new(engine: Arc<dyn GraphEngine>, registry: Arc<NodeRegistry>, supported: VersionRange) -> Self {
        Self {
            engine,
            registry,
            supported,
        }
    }

    pub fn with_supported(mut self, supported: VersionRange) -> Self {
        self.supported = supported;
        self
    }

    pub fn engine(&self) -> &Arc<dyn GraphEngine> {
        &self.engine
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn supported(&self) -> VersionRange {
        self.supported
    }

    /// Rejects documents whose declared version lies outside the supported
    /// range. Never touches the engine.
    pub fn check_version(&self, descriptor: &ResourceDescriptor, json: &str) -> Result<SchemaVersion, ResolveError> {
        let id = descriptor.id().as_str();
        let header: VersionHeader =
            serde_json::from_str(json).map_err(|e| ResolveError::decode(id, "blueprint", e))?;

        let declared = header.version.or_else(|| descriptor.settings().blueprint().version);
        let unsupported = |found: String| ResolveError::UnsupportedVersion {
            id: id.to_string(),
            found,
            min: self.supported.min.to_string(),
            max: self.supported.max.to_string(),
        };

        let raw = declared.ok_or_else(|| unsupported("<none>".to_string()))?;
        let version: SchemaVersion = raw.parse().map_err(|_| unsupported(raw.clone()))?;
        if !self.supported.contains(&version) {
            return Err(unsupported(raw));
        }
        Ok(version)
    }
}

#[async_trait]
impl Decoder for BlueprintDecoder {
    type Output = Arc<GraphInstance>;

    fn kind(&self) -> &'static str {
        "blueprint"
    }

    async fn decode(&self, descriptor: &ResourceDescriptor, bytes: Vec<u8>) -> Result<Arc<GraphInstance>, ResolveError> {
        let id = descriptor.id();
        let json = String::from_utf8(bytes).map_err(|e| ResolveError::decode(id.as_str(), "blueprint", e))?;

        let version = self.check_version(descriptor, &json).inspect_err(|e| {
            warn!(resource = %id, error = %e, "Rejecting blueprint");
        })?;

        let handle = self.engine.load(&self.registry, &json)?;
        debug!(resource = %id, %handle, %version, "Blueprint loaded");
        Ok(Arc::new(GraphInstance::new(id.clone(), handle, Arc::clone(&self.engine))))
    }
}
