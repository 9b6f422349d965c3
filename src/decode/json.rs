use crate::decode::Decoder;
use crate::error::ResolveError;
use crate::resource::ResourceDescriptor;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;

/// Decodes any JSON-backed serde type.
pub struct JsonDecoder<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonDecoder<T> {
    pub fn new() -> Self {
        Self { _marker: PhantomData }
    }
}

impl<T> Default for JsonDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> Decoder for JsonDecoder<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Output = T;

    fn kind(&self) -> &'static str {
        "json"
    }

    async fn decode(&self, descriptor: &ResourceDescriptor, bytes: Vec<u8>) -> Result<T, ResolveError> {
        serde_json::from_slice(&bytes).map_err(|e| ResolveError::decode(descriptor.id().as_str(), "json", e))
    }
}
