//! Item source: where candidate PDFs come from and how they reach disk.
//!
//! Two capabilities sit at the edge of the pipeline:
//!
//! * [`ItemLister`] — enumerate raw locators for a [`Period`]
//!   ([`GcsLister`] for the public arXiv bucket, [`DirectoryLister`] for a
//!   local mirror).
//! * [`Fetcher`] — copy one item's payload into its own scratch directory
//!   ([`HttpFetcher`], [`LocalFetcher`]).
//!
//! [`discover`] sits between the lister and the pipeline: it turns locators
//! into [`ItemDescriptor`]s, keeps the latest version of each paper and
//! drops everything the checkpoint already resolved.

mod gcs;
mod http;
mod local;

pub use gcs::GcsLister;
pub use http::HttpFetcher;
pub use local::{DirectoryLister, LocalFetcher};

use crate::config::Period;
use crate::error::{FetchError, ListError};
use crate::item::{FetchedItem, ItemDescriptor, ScratchDir};
use crate::store::CheckpointStore;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// Enumerates candidate locators for a period.
#[async_trait::async_trait]
pub trait ItemLister: Send + Sync {
    async fn list(&self, period: &Period) -> Result<Vec<String>, ListError>;
}

/// Retrieves one item's payload into scratch storage under `scratch_root`.
///
/// Implementations create the item's scratch directory themselves (see
/// [`create_scratch`]) so a failed fetch leaves nothing behind.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        item: &ItemDescriptor,
        scratch_root: &Path,
    ) -> Result<FetchedItem, FetchError>;
}

/// Create `<scratch_root>/<id>_XXXXXX/` and return it with the payload path
/// `<dir>/<id>.pdf` inside it.
pub fn create_scratch(
    item: &ItemDescriptor,
    scratch_root: &Path,
) -> Result<(ScratchDir, std::path::PathBuf), FetchError> {
    let safe_id = item.id.replace('/', "_");
    let dir = tempfile::Builder::new()
        .prefix(&format!("{safe_id}_"))
        .tempdir_in(scratch_root)?;
    let payload = dir.path().join(format!("{safe_id}.pdf"));
    Ok((ScratchDir::new(dir), payload))
}

/// Result of [`discover`].
#[derive(Debug, Default)]
pub struct Discovery {
    pub listed_files: usize,
    pub unique_items: usize,
    /// Latest versions not yet checkpointed, in first-appearance order.
    pub pending: Vec<ItemDescriptor>,
}

static VERSIONED_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<base>.+)v(?P<version>\d+)$").expect("valid regex"));

/// Split `2101.00001v2` into `("2101.00001", 2)`.
///
/// No `v` means version 1. A trailing `v` part that is not a number is
/// also treated as version 1, with the text before the last `v` as base.
pub fn split_version(id: &str) -> (String, u32) {
    if let Some(caps) = VERSIONED_ID.captures(id) {
        if let Ok(v) = caps["version"].parse::<u32>() {
            return (caps["base"].to_string(), v);
        }
    }
    match id.rsplit_once('v') {
        Some((base, _)) => {
            warn!("Invalid version in {}, treating as v1", id);
            (base.to_string(), 1)
        }
        None => (id.to_string(), 1),
    }
}

/// Identifier for a locator: its file name without the `.pdf` extension.
pub fn id_from_locator(locator: &str) -> Option<String> {
    let name = locator.trim_end_matches('/').rsplit('/').next()?;
    let id = name.strip_suffix(".pdf").unwrap_or(name);
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// Collapse versions and filter against the checkpoint.
pub fn discover(locators: &[String], checkpoints: &CheckpointStore) -> Discovery {
    struct Latest {
        version: u32,
        item: ItemDescriptor,
    }

    let mut order: Vec<String> = Vec::new();
    let mut latest: HashMap<String, Latest> = HashMap::new();
    let mut listed_files = 0;

    for locator in locators.iter().map(|l| l.trim()).filter(|l| !l.is_empty()) {
        listed_files += 1;
        let Some(id) = id_from_locator(locator) else {
            warn!("Could not parse an item id from {}", locator);
            continue;
        };
        let (base, version) = split_version(&id);
        let candidate = Latest {
            version,
            item: ItemDescriptor::new(id, locator),
        };
        match latest.get_mut(&base) {
            Some(current) if version > current.version => *current = candidate,
            Some(_) => {}
            None => {
                order.push(base.clone());
                latest.insert(base, candidate);
            }
        }
    }

    let unique_items = order.len();
    let pending: Vec<ItemDescriptor> = order
        .into_iter()
        .filter_map(|base| latest.remove(&base))
        .map(|l| l.item)
        .filter(|item| !checkpoints.contains(&item.id))
        .collect();

    info!("Found {} total PDF files", listed_files);
    info!("Identified {} unique items (after grouping versions)", unique_items);
    info!("Found {} new items to process (latest versions only)", pending.len());

    Discovery {
        listed_files,
        unique_items,
        pending,
    }
}
