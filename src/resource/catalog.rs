use crate::error::CatalogError;
use crate::resource::descriptor::{ImportSettings, ResourceDescriptor, ResourceId, ResourceType};
use crate::resource::version::SchemaVersion;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Wire format of a catalog document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogDocument {
    pub version: String,
    #[serde(default)]
    pub resources: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub uri: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub metadata: Value,
}

/// Ordered set of descriptors keyed by id.
///
/// Registration is first-wins: a later descriptor with an id that is
/// already present is ignored. Callers rely on this to register defaults
/// before overrides.
#[derive(Debug, Clone)]
pub struct Catalog {
    version: SchemaVersion,
    entries: Vec<Arc<ResourceDescriptor>>,
    index: HashMap<ResourceId, usize>,
}

impl Catalog {
    pub fn new(version: SchemaVersion) -> Self {
        Self {
            version,
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn version(&self) -> SchemaVersion {
        self.version
    }

    /// Returns `false` when the id was already registered and the descriptor was ignored.
    pub fn register(&mut self, descriptor: ResourceDescriptor) -> bool {
        self.insert(Arc::new(descriptor))
    }

    fn insert(&mut self, descriptor: Arc<ResourceDescriptor>) -> bool {
        if self.index.contains_key(descriptor.id()) {
            debug!(resource = %descriptor.id(), "Ignoring duplicate catalog registration");
            return false;
        }
        self.index.insert(descriptor.id().clone(), self.entries.len());
        self.entries.push(descriptor);
        true
    }

    /// Merges `other` into `self`, keeping existing entries. Returns how many were added.
    pub fn merge(&mut self, other: &Catalog) -> usize {
        other
            .entries
            .iter()
            .filter(|d| self.insert(Arc::clone(d)))
            .count()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<ResourceDescriptor>> {
        self.index.get(id).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ResourceDescriptor>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn from_document(doc: CatalogDocument) -> Result<Self, CatalogError> {
        let version: SchemaVersion = doc
            .version
            .parse()
            .map_err(|_| CatalogError::Version(doc.version.clone()))?;

        let mut catalog = Catalog::new(version);
        for (position, entry) in doc.resources.into_iter().enumerate() {
            let Ok(id) = ResourceId::new(entry.id) else {
                warn!(position, "Skipping catalog entry with empty id");
                continue;
            };
            let kind = ResourceType::from(entry.kind.as_str());
            let settings = ImportSettings::from_metadata(&kind, entry.metadata);
            let mut descriptor = ResourceDescriptor::new(id, entry.uri, kind)
                .with_settings(settings)
                .with_schema_version(version);
            if let Some(hash) = entry.hash {
                descriptor = descriptor.with_hash(hash);
            }
            catalog.register(descriptor);
        }
        Ok(catalog)
    }

    pub fn to_document(&self) -> CatalogDocument {
        CatalogDocument {
            version: self.version.to_string(),
            resources: self
                .entries
                .iter()
                .map(|d| CatalogEntry {
                    id: d.id().to_string(),
                    uri: d.uri().to_string(),
                    kind: d.kind().to_string(),
                    hash: d.hash().map(str::to_string),
                    metadata: d.settings().to_metadata(),
                })
                .collect(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let doc: CatalogDocument = serde_json::from_str(json)?;
        Self::from_document(doc)
    }

    pub fn to_json(&self) -> Result<String, CatalogError> {
        Ok(serde_json::to_string_pretty(&self.to_document())?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Catalog::new(SchemaVersion::new(1, 0, 0))
    }
}
