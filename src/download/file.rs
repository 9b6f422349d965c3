use crate::download::{Downloader, scheme_of};
use crate::error::ResolveError;
use crate::resource::ResourceDescriptor;
use async_trait::async_trait;
use reqwest::Url;
use std::path::PathBuf;
use tracing::debug;

/// Reads `file://` URIs and plain paths. Relative paths resolve against
/// `root` when one is set.
#[derive(Debug, Clone, Default)]
pub struct FileDownloader {
    root: Option<PathBuf>,
}

impl FileDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn path_for(&self, uri: &str) -> Result<PathBuf, ResolveError> {
        let path = match scheme_of(uri).as_deref() {
            Some("file") => Url::parse(uri)
                .ok()
                .and_then(|url| url.to_file_path().ok())
                .ok_or_else(|| ResolveError::MalformedUri(uri.to_string()))?,
            Some(_) => return Err(ResolveError::MalformedUri(uri.to_string())),
            None => PathBuf::from(uri),
        };

        Ok(match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path,
        })
    }
}

#[async_trait]
impl Downloader for FileDownloader {
    fn name(&self) -> &str {
        "file"
    }

    fn can_download(&self, descriptor: &ResourceDescriptor) -> bool {
        match scheme_of(descriptor.uri()).as_deref() {
            Some("file") | None => !descriptor.uri().is_empty(),
            Some(_) => false,
        }
    }

    async fn download(&self, descriptor: &ResourceDescriptor) -> Result<Vec<u8>, ResolveError> {
        let path = self.path_for(descriptor.uri())?;
        debug!(resource = %descriptor.id(), path = %path.display(), "Reading from disk");
        tokio::fs::read(&path)
            .await
            .map_err(|e| ResolveError::transport(descriptor.uri(), e))
    }
}
