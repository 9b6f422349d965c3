use crate::error::ResolveError;
use crate::resource::version::SchemaVersion;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Borrow;
use std::fmt;
use tracing::warn;

/// Non-empty resource identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Result<Self, ResolveError> {
        let id = id.into();
        if id.is_empty() {
            return Err(ResolveError::EmptyId);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ResourceId {
    type Error = ResolveError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ResourceId::new(value)
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.0
    }
}

impl Borrow<str> for ResourceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Type tag of a catalogued resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Texture,
    Mesh,
    Blueprint,
    Json,
    Other(String),
}

impl ResourceType {
    pub fn as_str(&self) -> &str {
        match self {
            ResourceType::Texture => "texture",
            ResourceType::Mesh => "mesh",
            ResourceType::Blueprint => "blueprint",
            ResourceType::Json => "json",
            ResourceType::Other(tag) => tag,
        }
    }
}

impl From<&str> for ResourceType {
    fn from(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "texture" => ResourceType::Texture,
            "mesh" => ResourceType::Mesh,
            "blueprint" | "graph" => ResourceType::Blueprint,
            "json" => ResourceType::Json,
            _ => ResourceType::Other(tag.to_string()),
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextureSettings {
    #[serde(default = "default_srgb")]
    pub srgb: bool,
}

fn default_srgb() -> bool {
    true
}

impl Default for TextureSettings {
    fn default() -> Self {
        Self { srgb: true }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshSettings {
    /// Mesh name or index inside the archive. `None` selects the first mesh.
    #[serde(default)]
    pub mesh: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlueprintSettings {
    #[serde(default)]
    pub version: Option<String>,
}

/// Type-specific import settings carried by a descriptor.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ImportSettings {
    #[default]
    None,
    Texture(TextureSettings),
    Mesh(MeshSettings),
    Blueprint(BlueprintSettings),
    Raw(Value),
}

impl ImportSettings {
    /// Interprets a catalog `metadata` object for the given type. Malformed
    /// metadata falls back to the type's defaults.
    pub fn from_metadata(kind: &ResourceType, metadata: Value) -> Self {
        fn parse<T: serde::de::DeserializeOwned + Default>(kind: &ResourceType, metadata: Value) -> T {
            if metadata.is_null() {
                return T::default();
            }
            serde_json::from_value(metadata).unwrap_or_else(|e| {
                warn!(kind = %kind, error = %e, "Ignoring malformed import settings");
                T::default()
            })
        }

        match kind {
            ResourceType::Texture => ImportSettings::Texture(parse(kind, metadata)),
            ResourceType::Mesh => ImportSettings::Mesh(parse(kind, metadata)),
            ResourceType::Blueprint => ImportSettings::Blueprint(parse(kind, metadata)),
            _ if metadata.is_null() => ImportSettings::None,
            _ => ImportSettings::Raw(metadata),
        }
    }

    pub fn to_metadata(&self) -> Value {
        let value = match self {
            ImportSettings::None => Ok(Value::Null),
            ImportSettings::Texture(s) => serde_json::to_value(s),
            ImportSettings::Mesh(s) => serde_json::to_value(s),
            ImportSettings::Blueprint(s) => serde_json::to_value(s),
            ImportSettings::Raw(v) => Ok(v.clone()),
        };
        value.unwrap_or(Value::Null)
    }

    pub fn texture(&self) -> TextureSettings {
        match self {
            ImportSettings::Texture(s) => s.clone(),
            _ => TextureSettings::default(),
        }
    }

    pub fn mesh(&self) -> MeshSettings {
        match self {
            ImportSettings::Mesh(s) => s.clone(),
            _ => MeshSettings::default(),
        }
    }

    pub fn blueprint(&self) -> BlueprintSettings {
        match self {
            ImportSettings::Blueprint(s) => s.clone(),
            _ => BlueprintSettings::default(),
        }
    }
}

/// Immutable description of one loadable resource.
///
/// A missing `hash` makes the resource uncacheable. A present hash is the
/// only invalidation mechanism: cached bytes are authoritative for it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDescriptor {
    id: ResourceId,
    uri: String,
    hash: Option<String>,
    kind: ResourceType,
    settings: ImportSettings,
    schema_version: Option<SchemaVersion>,
}

impl ResourceDescriptor {
    pub fn new(id: ResourceId, uri: impl Into<String>, kind: ResourceType) -> Self {
        Self {
            id,
            uri: uri.into(),
            hash: None,
            kind,
            settings: ImportSettings::None,
            schema_version: None,
        }
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        let hash = hash.into();
        self.hash = (!hash.is_empty()).then_some(hash);
        self
    }

    pub fn with_settings(mut self, settings: ImportSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_schema_version(mut self, version: SchemaVersion) -> Self {
        self.schema_version = Some(version);
        self
    }

    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn hash(&self) -> Option<&str> {
        self.hash.as_deref()
    }

    pub fn kind(&self) -> &ResourceType {
        &self.kind
    }

    pub fn settings(&self) -> &ImportSettings {
        &self.settings
    }

    pub fn schema_version(&self) -> Option<SchemaVersion> {
        self.schema_version
    }
}
