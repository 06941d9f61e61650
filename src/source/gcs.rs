//! Listing the public arXiv bulk-data bucket.
//!
//! The bucket is world-readable, so the Cloud Storage JSON API can be used
//! without credentials. A month of submissions spans several result pages;
//! `nextPageToken` is followed until exhausted.

use super::ItemLister;
use crate::config::Period;
use crate::error::ListError;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_API_ENDPOINT: &str = "https://storage.googleapis.com";
pub const ARXIV_BUCKET: &str = "arxiv-dataset";
pub const ARXIV_PDF_PREFIX: &str = "arxiv/arxiv/pdf";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectList {
    #[serde(default)]
    items: Vec<ObjectEntry>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectEntry {
    name: String,
}

/// [`ItemLister`] over a Cloud Storage bucket, yielding `gs://` locators.
#[derive(Debug, Clone)]
pub struct GcsLister {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    prefix: String,
}

impl GcsLister {
    /// Lister for `gs://arxiv-dataset/arxiv/arxiv/pdf/`.
    pub fn arxiv() -> Result<Self, ListError> {
        Self::new(DEFAULT_API_ENDPOINT, ARXIV_BUCKET, ARXIV_PDF_PREFIX)
    }

    pub fn new(
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Result<Self, ListError> {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ListError::Request {
                url: endpoint.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            endpoint,
            bucket: bucket.into(),
            prefix: prefix.into().trim_matches('/').to_string(),
        })
    }

    fn objects_url(&self) -> String {
        format!("{}/storage/v1/b/{}/o", self.endpoint, self.bucket)
    }

    async fn page(&self, prefix: &str, token: Option<&str>) -> Result<ObjectList, ListError> {
        let url = self.objects_url();
        let mut query = vec![("prefix", prefix), ("fields", "items(name),nextPageToken")];
        if let Some(t) = token {
            query.push(("pageToken", t));
        }

        let request_err = |e: reqwest::Error| ListError::Request {
            url: url.clone(),
            reason: e.to_string(),
        };
        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(request_err)?;

        if !response.status().is_success() {
            return Err(ListError::Status {
                url: url.clone(),
                status: response.status().as_u16(),
            });
        }
        response.json::<ObjectList>().await.map_err(request_err)
    }
}

#[async_trait::async_trait]
impl ItemLister for GcsLister {
    async fn list(&self, period: &Period) -> Result<Vec<String>, ListError> {
        let prefix = format!("{}/{}/", self.prefix, period.prefix());
        let mut locators = Vec::new();
        let mut token: Option<String> = None;
        let mut pages = 0;

        loop {
            let page = self.page(&prefix, token.as_deref()).await?;
            pages += 1;
            locators.extend(
                page.items
                    .into_iter()
                    .filter(|o| o.name.ends_with(".pdf"))
                    .map(|o| format!("gs://{}/{}", self.bucket, o.name)),
            );
            match page.next_page_token {
                Some(t) if !t.is_empty() => token = Some(t),
                _ => break,
            }
        }

        debug!(
            "Listed {} PDFs under gs://{}/{} in {} pages",
            locators.len(),
            self.bucket,
            prefix,
            pages
        );
        Ok(locators)
    }
}
