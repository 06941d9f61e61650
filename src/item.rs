//! Items as they move through the pipeline.
//!
//! ```text
//! ItemDescriptor ──fetch──▶ FetchedItem ──worker──▶ ConversionResult
//! (id + locator)            (+ payload, scratch)     (Success | Failure)
//! ```
//!
//! A [`FetchedItem`] owns its [`ScratchDir`]. Whoever holds the item when
//! its outcome is decided releases the directory; dropping the item
//! releases it too, so no exit path can leak scratch storage.

use crate::error::ItemError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::warn;

/// One logical item, already collapsed to its latest version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDescriptor {
    /// Versioned identifier, e.g. `2101.00001v2`.
    pub id: String,
    /// Where the payload lives (`gs://…`, `https://…` or a local path).
    pub locator: String,
}

impl ItemDescriptor {
    pub fn new(id: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            locator: locator.into(),
        }
    }
}

/// Per-item scratch directory, removed exactly once.
///
/// The isolated worker deletes the directory as soon as it knows the
/// item's outcome; the controller's handle then finds nothing left to
/// remove, which is not an error.
#[derive(Debug)]
pub struct ScratchDir {
    dir: Option<TempDir>,
}

impl ScratchDir {
    pub fn new(dir: TempDir) -> Self {
        Self { dir: Some(dir) }
    }

    pub fn path(&self) -> &Path {
        match &self.dir {
            Some(d) => d.path(),
            None => Path::new(""),
        }
    }

    /// Remove the directory now, tolerating an earlier removal.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove scratch dir {}: {}", path.display(), e);
                }
            }
        }
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// An item whose payload is on local disk.
#[derive(Debug)]
pub struct FetchedItem {
    pub descriptor: ItemDescriptor,
    pub payload_path: PathBuf,
    pub scratch: ScratchDir,
}

impl FetchedItem {
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    /// Release the scratch directory at the item's terminal point.
    pub fn release(self) {
        self.scratch.release();
    }
}

/// Tagged outcome for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConversionResult {
    Success { id: String, markdown: String },
    Failure { id: String, error: ItemError },
}

impl ConversionResult {
    pub fn success(id: impl Into<String>, markdown: impl Into<String>) -> Self {
        ConversionResult::Success {
            id: id.into(),
            markdown: markdown.into(),
        }
    }

    pub fn failure(id: impl Into<String>, error: ItemError) -> Self {
        ConversionResult::Failure {
            id: id.into(),
            error,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ConversionResult::Success { id, .. } | ConversionResult::Failure { id, .. } => id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ConversionResult::Success { .. })
    }
}

/// One line of the output log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub arxiv_id: String,
    pub markdown: String,
}
