use crate::download::{Downloader, scheme_of};
use crate::error::ResolveError;
use crate::resource::ResourceDescriptor;
use async_trait::async_trait;
use reqwest::{Client, Url};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    pub fn with_options(timeout: Option<Duration>, user_agent: Option<&str>) -> reqwest::Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(agent) = user_agent {
            builder = builder.user_agent(agent.to_string());
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

impl Default for HttpDownloader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    fn name(&self) -> &str {
        "http"
    }

    fn can_download(&self, descriptor: &ResourceDescriptor) -> bool {
        matches!(scheme_of(descriptor.uri()).as_deref(), Some("http" | "https"))
    }

    async fn download(&self, descriptor: &ResourceDescriptor) -> Result<Vec<u8>, ResolveError> {
        let uri = descriptor.uri();
        let url = Url::parse(uri).map_err(|_| ResolveError::MalformedUri(uri.to_string()))?;

        debug!(resource = %descriptor.id(), %url, "Downloading");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ResolveError::transport(uri, e))?;

        let status = response.status();
        if !status.is_success() {
            warn!(resource = %descriptor.id(), uri, status = status.as_u16(), "Download rejected");
            return Err(ResolveError::HttpStatus {
                uri: uri.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ResolveError::transport(uri, e))?;
        Ok(bytes.to_vec())
    }
}
