use crate::decode::{Decoder, decode_blocking};
use crate::error::ResolveError;
use crate::resource::ResourceDescriptor;
use async_trait::async_trait;
use std::fmt;

/// Decoded RGBA8 texture.
#[derive(Clone, PartialEq)]
pub struct Texture {
    pub width: u32,
    pub height: u32,
    /// Whether samplers should treat the pixels as sRGB.
    pub srgb: bool,
    pub pixels: Vec<u8>,
}

impl fmt::Debug for Texture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Texture")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("srgb", &self.srgb)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TextureDecoder;

#[async_trait]
impl Decoder for TextureDecoder {
    type Output = Texture;

    fn kind(&self) -> &'static str {
        "texture"
    }

    async fn decode(&self, descriptor: &ResourceDescriptor, bytes: Vec<u8>) -> Result<Texture, ResolveError> {
        let srgb = descriptor.settings().texture().srgb;
        let id = descriptor.id().to_string();

        decode_blocking(descriptor.id().as_str(), "texture", move || {
            let image = image::load_from_memory(&bytes).map_err(|e| ResolveError::decode(&id, "texture", e))?;
            let rgba = image.to_rgba8();
            Ok(Texture {
                width: rgba.width(),
                height: rgba.height(),
                srgb,
                pixels: rgba.into_raw(),
            })
        })
        .await
    }
}
