pub mod catalog;
pub mod descriptor;
pub mod version;

pub use catalog::{Catalog, CatalogDocument, CatalogEntry};
pub use descriptor::{
    BlueprintSettings, ImportSettings, MeshSettings, ResourceDescriptor, ResourceId, ResourceType,
    TextureSettings,
};
pub use version::{SchemaVersion, VersionRange};
