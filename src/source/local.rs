//! A local mirror laid out like the bucket: `<root>/<YYMM>/<id>.pdf`.

use super::{create_scratch, Fetcher, ItemLister};
use crate::config::Period;
use crate::error::{FetchError, ListError};
use crate::item::{FetchedItem, ItemDescriptor};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct DirectoryLister {
    root: PathBuf,
}

impl DirectoryLister {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait::async_trait]
impl ItemLister for DirectoryLister {
    async fn list(&self, period: &Period) -> Result<Vec<String>, ListError> {
        let dir = self.root.join(period.prefix());
        let err = |source| ListError::Directory {
            path: dir.clone(),
            source,
        };
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(err)?;
        let mut locators = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(err)? {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "pdf") && path.is_file() {
                locators.push(path.to_string_lossy().into_owned());
            }
        }
        // read_dir order is unspecified.
        locators.sort();
        Ok(locators)
    }
}

/// Copies a local file locator into scratch storage.
#[derive(Debug, Clone, Default)]
pub struct LocalFetcher;

#[async_trait::async_trait]
impl Fetcher for LocalFetcher {
    async fn fetch(
        &self,
        item: &ItemDescriptor,
        scratch_root: &Path,
    ) -> Result<FetchedItem, FetchError> {
        let source = item
            .locator
            .strip_prefix("file://")
            .unwrap_or(&item.locator);
        let (scratch, payload_path) = create_scratch(item, scratch_root)?;
        tokio::fs::copy(source, &payload_path)
            .await
            .map_err(|e| FetchError::Download {
                locator: item.locator.clone(),
                reason: e.to_string(),
            })?;
        Ok(FetchedItem {
            descriptor: item.clone(),
            payload_path,
            scratch,
        })
    }
}
