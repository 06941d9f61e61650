//! What crosses the process boundary between controller and worker.
//!
//! The controller writes one [`BatchRequest`] as JSON to the worker's stdin
//! and closes it. The worker answers with exactly one [`BatchResponse`]
//! line on stdout; everything else it has to say goes to stderr.

use crate::config::{AssetSpec, ConverterSpec};
use crate::item::{ConversionResult, FetchedItem};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub payload_path: PathBuf,
    /// Removed by the worker once the item's outcome is known.
    pub scratch_dir: PathBuf,
}

impl From<&FetchedItem> for WorkItem {
    fn from(item: &FetchedItem) -> Self {
        Self {
            id: item.id().to_string(),
            payload_path: item.payload_path.clone(),
            scratch_dir: item.scratch.path().to_path_buf(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub worker_id: u64,
    pub items: Vec<WorkItem>,
    pub converter: ConverterSpec,
    #[serde(default)]
    pub assets: Option<AssetSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResponse {
    pub worker_id: u64,
    pub results: Vec<ConversionResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_without_assets_field_parses() {
        let json = r#"{"worker_id":3,"items":[{"id":"a","payload_path":"/s/a.pdf","scratch_dir":"/s"}],
            "converter":{"program":"cat","args":["{input}"]}}"#;
        let req: BatchRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.worker_id, 3);
        assert_eq!(req.items[0].id, "a");
        assert!(req.assets.is_none());
    }

    #[test]
    fn response_is_a_single_line() {
        let resp = BatchResponse {
            worker_id: 1,
            results: vec![ConversionResult::success("a", "line 1\nline 2\n")],
        };
        let line = serde_json::to_string(&resp).unwrap();
        assert!(!line.contains('\n'));
    }
}
