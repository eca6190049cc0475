//! Document fetchers: authenticated HTTP(S) and local files.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use tracing::{debug, info, instrument};
use url::Url;

use pageview_core::config::FetchConfig;
use pageview_core::error::FetchError;
use pageview_core::{Credential, DocumentFetcher};

/// What a response status means for the load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Ok,
    Unauthorized,
    Failed,
}

pub fn classify_status(status: StatusCode) -> StatusClass {
    if status.is_success() {
        StatusClass::Ok
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        StatusClass::Unauthorized
    } else {
        StatusClass::Failed
    }
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> anyhow::Result<Self> {
        let mut builder = Client::builder().user_agent(config.user_agent.clone());
        if let Some(secs) = config.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(secs));
        }
        let client = builder.build().context("failed to create HTTP client")?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DocumentFetcher for HttpFetcher {
    #[instrument(skip(self, credential), fields(authenticated = credential.is_some()))]
    async fn fetch(
        &self,
        source: &str,
        credential: Option<&Credential>,
    ) -> Result<Bytes, FetchError> {
        let url = Url::parse(source).map_err(|err| FetchError::InvalidSource {
            location: source.to_string(),
            reason: err.to_string(),
        })?;

        let mut request = self.client.get(url);
        if let Some(credential) = credential {
            request = request.bearer_auth(credential.token());
        }

        let response = request
            .send()
            .await
            .map_err(|err| FetchError::network(source, err))?;

        let status = response.status();
        match classify_status(status) {
            StatusClass::Ok => {}
            StatusClass::Unauthorized => {
                return Err(FetchError::Auth {
                    location: source.to_string(),
                    status: status.as_u16(),
                })
            }
            StatusClass::Failed => {
                return Err(FetchError::network(source, format!("HTTP {status}")));
            }
        }

        if let Some(size) = response.content_length() {
            debug!(size, "response size");
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| FetchError::network(source, err))?;
        info!(bytes = bytes.len(), "document downloaded");
        Ok(bytes)
    }
}

/// Reads documents from disk. Accepts plain paths and `file://` URLs.
#[derive(Debug, Default)]
pub struct LocalFileFetcher;

impl LocalFileFetcher {
    pub fn resolve(source: &str) -> Result<PathBuf, FetchError> {
        if source.starts_with("file:") {
            let url = Url::parse(source).map_err(|err| FetchError::InvalidSource {
                location: source.to_string(),
                reason: err.to_string(),
            })?;
            return url.to_file_path().map_err(|_| FetchError::InvalidSource {
                location: source.to_string(),
                reason: "not a local file URL".into(),
            });
        }
        if source.trim().is_empty() {
            return Err(FetchError::InvalidSource {
                location: source.to_string(),
                reason: "empty path".into(),
            });
        }
        Ok(PathBuf::from(source))
    }
}

#[async_trait]
impl DocumentFetcher for LocalFileFetcher {
    #[instrument(skip(self, _credential))]
    async fn fetch(
        &self,
        source: &str,
        _credential: Option<&Credential>,
    ) -> Result<Bytes, FetchError> {
        let path = Self::resolve(source)?;
        let data = tokio::fs::read(&path)
            .await
            .map_err(|err| FetchError::network(source, err))?;
        debug!(bytes = data.len(), path = ?path, "document read from disk");
        Ok(Bytes::from(data))
    }
}

/// Routes remote sources over HTTP and everything else to the filesystem.
pub struct SourceFetcher {
    http: HttpFetcher,
    local: LocalFileFetcher,
}

impl SourceFetcher {
    pub fn new(config: &FetchConfig) -> anyhow::Result<Self> {
        Ok(Self {
            http: HttpFetcher::new(config)?,
            local: LocalFileFetcher,
        })
    }
}

#[async_trait]
impl DocumentFetcher for SourceFetcher {
    async fn fetch(
        &self,
        source: &str,
        credential: Option<&Credential>,
    ) -> Result<Bytes, FetchError> {
        if pageview_core::is_remote_source(source) {
            self.http.fetch(source, credential).await
        } else {
            self.local.fetch(source, credential).await
        }
    }
}
