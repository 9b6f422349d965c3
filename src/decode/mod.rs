use crate::error::ResolveError;
use crate::resource::ResourceDescriptor;
use async_trait::async_trait;

pub mod blueprint;
pub mod json;
pub mod mesh;
pub mod texture;

pub use self::blueprint::BlueprintDecoder;
pub use self::json::JsonDecoder;
pub use self::mesh::{MeshDecoder, MeshImport};
pub use self::texture::{Texture, TextureDecoder};

/// 解码器接口 (Decoder)
/// Turns raw bytes plus the descriptor's import settings into a typed asset.
/// Must tolerate `ImportSettings::None` by using defaults.
#[async_trait]
pub trait Decoder: Send + Sync {
    type Output: Send + 'static;

    fn kind(&self) -> &'static str;
    async fn decode(&self, descriptor: &ResourceDescriptor, bytes: Vec<u8>) -> Result<Self::Output, ResolveError>;
}

/// Passes bytes through untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawDecoder;

#[async_trait]
impl Decoder for RawDecoder {
    type Output = Vec<u8>;

    fn kind(&self) -> &'static str {
        "raw"
    }

    async fn decode(&self, _descriptor: &ResourceDescriptor, bytes: Vec<u8>) -> Result<Vec<u8>, ResolveError> {
        Ok(bytes)
    }
}

/// Runs CPU-heavy decode work off the async workers.
pub(crate) async fn decode_blocking<T, F>(id: &str, kind: &'static str, work: F) -> Result<T, ResolveError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ResolveError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ResolveError::decode(id, kind, e))?
}
