use crate::decode::{Decoder, decode_blocking};
use crate::error::ResolveError;
use crate::resource::ResourceDescriptor;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Handle to a validated glTF/GLB archive with one selected mesh.
/// Geometry extraction is left to the host importer.
#[derive(Clone)]
pub struct MeshImport {
    pub mesh_index: usize,
    pub mesh_name: Option<String>,
    pub mesh_count: usize,
    pub bytes: Arc<Vec<u8>>,
}

impl fmt::Debug for MeshImport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeshImport")
            .field("mesh_index", &self.mesh_index)
            .field("mesh_name", &self.mesh_name)
            .field("mesh_count", &self.mesh_count)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MeshDecoder;

#[async_trait]
impl Decoder for MeshDecoder {
    type Output = MeshImport;

    fn kind(&self) -> &'static str {
        "mesh"
    }

    async fn decode(&self, descriptor: &ResourceDescriptor, bytes: Vec<u8>) -> Result<MeshImport, ResolveError> {
        let selector = descriptor.settings().mesh().mesh;
        let id = descriptor.id().to_string();

        decode_blocking(descriptor.id().as_str(), "mesh", move || {
            let (mesh_index, mesh_name, mesh_count) = {
                let gltf = gltf::Gltf::from_slice(&bytes).map_err(|e| ResolveError::decode(&id, "mesh", e))?;
                let mesh_count = gltf.meshes().len();

                // Name match first, then numeric index.
                let mesh = match selector.as_deref() {
                    Some(sel) => gltf
                        .meshes()
                        .find(|m| m.name() == Some(sel))
                        .or_else(|| sel.parse::<usize>().ok().and_then(|i| gltf.meshes().nth(i))),
                    None => gltf.meshes().next(),
                };
                let mesh = mesh.ok_or_else(|| {
                    let wanted = selector.as_deref().unwrap_or("<first>");
                    ResolveError::decode(&id, "mesh", format!("no mesh {wanted} among {mesh_count}"))
                })?;

                (mesh.index(), mesh.name().map(str::to_string), mesh_count)
            };

            Ok(MeshImport {
                mesh_index,
                mesh_name,
                mesh_count,
                bytes: Arc::new(bytes),
            })
        })
        .await
    }
}
