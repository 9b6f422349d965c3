use crate::error::ResolveError;
use crate::resource::ResourceDescriptor;
use async_trait::async_trait;
use reqwest::Url;
use std::fmt::Debug;

pub mod file;
pub mod http;

pub use self::file::FileDownloader;
pub use self::http::HttpDownloader;

/// 下载器接口 (Downloader)
/// Turns a descriptor's URI into raw bytes. Timeouts are the
/// implementation's business.
#[async_trait]
pub trait Downloader: Send + Sync + Debug {
    fn name(&self) -> &str;
    fn can_download(&self, descriptor: &ResourceDescriptor) -> bool;
    async fn download(&self, descriptor: &ResourceDescriptor) -> Result<Vec<u8>, ResolveError>;
}

/// URI scheme of `uri`, lower-cased. Scheme-less strings are plain paths.
pub(crate) fn scheme_of(uri: &str) -> Option<String> {
    match Url::parse(uri) {
        // A single letter is a Windows drive, not a scheme.
        Ok(url) if url.scheme().len() > 1 => Some(url.scheme().to_ascii_lowercase()),
        _ => None,
    }
}

/// Fallback downloader: http(s) through [`HttpDownloader`], `file://` and
/// plain paths through [`FileDownloader`].
#[derive(Debug, Default)]
pub struct DefaultDownloader {
    http: HttpDownloader,
    file: FileDownloader,
}

impl DefaultDownloader {
    pub fn new(http: HttpDownloader, file: FileDownloader) -> Self {
        Self { http, file }
    }
}

#[async_trait]
impl Downloader for DefaultDownloader {
    fn name(&self) -> &str {
        "default"
    }

    fn can_download(&self, descriptor: &ResourceDescriptor) -> bool {
        self.http.can_download(descriptor) || self.file.can_download(descriptor)
    }

    async fn download(&self, descriptor: &ResourceDescriptor) -> Result<Vec<u8>, ResolveError> {
        if self.http.can_download(descriptor) {
            self.http.download(descriptor).await
        } else if self.file.can_download(descriptor) {
            self.file.download(descriptor).await
        } else {
            Err(ResolveError::NoDownloader {
                uri: descriptor.uri().to_string(),
            })
        }
    }
}
