//! Downloading payloads over HTTP.
//!
//! `gs://bucket/object` locators are rewritten to the bucket's public
//! download URL; `http(s)://` locators are fetched as-is. The body is
//! streamed to disk so large PDFs are never held in memory.

use super::{create_scratch, Fetcher};
use crate::error::FetchError;
use crate::item::{FetchedItem, ItemDescriptor};
use futures::StreamExt;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::debug;

pub const DEFAULT_DOWNLOAD_ENDPOINT: &str = "https://storage.googleapis.com";

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    download_endpoint: String,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        Self::with_endpoint(DEFAULT_DOWNLOAD_ENDPOINT)
    }

    /// Use `endpoint` in place of `https://storage.googleapis.com` for
    /// `gs://` locators.
    pub fn with_endpoint(endpoint: impl Into<String>) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| FetchError::Download {
                locator: String::new(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            download_endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }

    /// The HTTP URL a locator is downloaded from.
    pub fn resolve_url(&self, locator: &str) -> Result<String, FetchError> {
        if let Some(rest) = locator.strip_prefix("gs://") {
            return Ok(format!("{}/{}", self.download_endpoint, rest));
        }
        if locator.starts_with("http://") || locator.starts_with("https://") {
            return Ok(locator.to_string());
        }
        Err(FetchError::UnsupportedLocator(locator.to_string()))
    }
}

#[async_trait::async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        item: &ItemDescriptor,
        scratch_root: &Path,
    ) -> Result<FetchedItem, FetchError> {
        let url = self.resolve_url(&item.locator)?;
        let download_err = |e: reqwest::Error| FetchError::Download {
            locator: item.locator.clone(),
            reason: e.to_string(),
        };

        let response = self.client.get(&url).send().await.map_err(download_err)?;
        if !response.status().is_success() {
            return Err(FetchError::Status {
                locator: item.locator.clone(),
                status: response.status().as_u16(),
            });
        }

        // Dropped (and removed) on any error below.
        let (scratch, payload_path) = create_scratch(item, scratch_root)?;
        let mut file = tokio::fs::File::create(&payload_path).await?;
        let mut body = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(download_err)?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        debug!("Downloaded {} ({} bytes)", item.id, written);
        Ok(FetchedItem {
            descriptor: item.clone(),
            payload_path,
            scratch,
        })
    }
}
