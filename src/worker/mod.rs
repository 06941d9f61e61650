//! Isolated batch executor, worker side.
//!
//! Runs inside the child process spawned by
//! [`crate::pipeline::executor::BatchExecutor`]: read one
//! [`BatchRequest`](crate::pipeline::protocol::BatchRequest) from stdin,
//! initialise the converter once, convert items one after another, answer
//! with one [`BatchResponse`](crate::pipeline::protocol::BatchResponse)
//! line on stdout. A failing item never stops the batch.
//!
//! Each item's scratch directory is removed as soon as its outcome is
//! known, so a batch that is killed halfway has already freed the items it
//! finished.

pub mod assets;
pub mod converter;

pub use assets::{AssetStore, LocalAssetStore};
pub use converter::{DocumentConverter, ExternalToolConverter, RenderedDocument};

use crate::error::{ItemError, WorkerError};
use crate::item::ConversionResult;
use crate::pipeline::protocol::{BatchRequest, BatchResponse, WorkItem};
use std::io::{Read, Write};
use std::path::Path;
use tracing::{error, info, warn};

/// Serve one batch request from `input`, writing the response to `output`.
pub fn run_worker<R: Read, W: Write>(mut input: R, mut output: W) -> Result<(), WorkerError> {
    let mut raw = String::new();
    input
        .read_to_string(&mut raw)
        .map_err(WorkerError::ReadRequest)?;
    let request: BatchRequest = serde_json::from_str(&raw).map_err(WorkerError::InvalidRequest)?;

    info!(
        "Worker {} started with {} items",
        request.worker_id,
        request.items.len()
    );

    let mut converter = ExternalToolConverter::new(request.converter.clone());
    let mut store = request.assets.as_ref().map(LocalAssetStore::new);
    let results = run_batch(
        &request.items,
        &mut converter,
        store.as_mut().map(|s| s as &mut dyn AssetStore),
    );

    let response = BatchResponse {
        worker_id: request.worker_id,
        results,
    };
    let mut line = serde_json::to_vec(&response).map_err(WorkerError::EncodeResponse)?;
    line.push(b'\n');
    output
        .write_all(&line)
        .and_then(|_| output.flush())
        .map_err(WorkerError::WriteResponse)?;

    info!("Worker {} finished", request.worker_id);
    Ok(())
}

/// Convert `items` in order with one initialised converter.
pub fn run_batch(
    items: &[WorkItem],
    converter: &mut dyn DocumentConverter,
    mut assets: Option<&mut dyn AssetStore>,
) -> Vec<ConversionResult> {
    if let Err(e) = converter.initialize() {
        error!("Error initializing converter: {}", e);
        let detail = e.to_string();
        return items
            .iter()
            .map(|item| {
                release_scratch(&item.scratch_dir);
                ConversionResult::failure(
                    &item.id,
                    ItemError::BatchInit {
                        detail: detail.clone(),
                    },
                )
            })
            .collect();
    }

    let total = items.len();
    items
        .iter()
        .enumerate()
        .map(|(n, item)| {
            info!("Processing {} ({}/{})", item.id, n + 1, total);
            let result = convert_one(item, &mut *converter, assets.as_deref_mut());
            match &result {
                ConversionResult::Success { id, .. } => info!("Successfully processed {}", id),
                ConversionResult::Failure { id, error } => {
                    error!("Error processing {}: {}", id, error)
                }
            }
            release_scratch(&item.scratch_dir);
            result
        })
        .collect()
}

fn convert_one(
    item: &WorkItem,
    converter: &mut (dyn DocumentConverter + '_),
    assets: Option<&mut (dyn AssetStore + '_)>,
) -> ConversionResult {
    if !item.payload_path.is_file() {
        return ConversionResult::failure(
            &item.id,
            ItemError::PayloadMissing {
                path: item.payload_path.clone(),
            },
        );
    }

    let conversion_failure = |detail: String| {
        ConversionResult::failure(&item.id, ItemError::Conversion { detail })
    };

    let assets_dir = item.scratch_dir.join("assets");
    if let Err(e) = std::fs::create_dir_all(&assets_dir) {
        return conversion_failure(format!("creating {}: {e}", assets_dir.display()));
    }

    let doc = match converter.convert(&item.id, &item.payload_path, &assets_dir) {
        Ok(doc) => doc,
        Err(e) => return conversion_failure(e.to_string()),
    };

    let markdown = match assets {
        Some(store) => {
            let mut locators = Vec::with_capacity(doc.assets.len());
            for (n, path) in doc.assets.iter().enumerate() {
                match store.persist(&item.id, n + 1, path) {
                    Ok(locator) => locators.push(locator),
                    Err(e) => return conversion_failure(e.to_string()),
                }
            }
            assets::substitute_placeholders(&doc.markdown, &locators)
        }
        None => doc.markdown,
    };

    ConversionResult::success(&item.id, markdown)
}

fn release_scratch(dir: &Path) {
    if dir.as_os_str().is_empty() {
        return;
    }
    if let Err(e) = std::fs::remove_dir_all(dir) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove scratch dir {}: {}", dir.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConverterSpec;
    use crate::error::ConvertError;
    use std::path::PathBuf;

    /// Echoes the payload; fails items whose id starts with `bad`.
    #[derive(Default)]
    struct FakeConverter {
        fail_init: bool,
        figures: usize,
        calls: usize,
    }

    impl DocumentConverter for FakeConverter {
        fn initialize(&mut self) -> Result<(), ConvertError> {
            if self.fail_init {
                return Err(ConvertError::ToolNotFound {
                    program: "fake".into(),
                });
            }
            Ok(())
        }

        fn convert(
            &mut self,
            id: &str,
            input: &Path,
            assets_dir: &Path,
        ) -> Result<RenderedDocument, ConvertError> {
            self.calls += 1;
            if id.starts_with("bad") {
                return Err(ConvertError::ToolFailed {
                    program: "fake".into(),
                    status: "exit status: 1".into(),
                    stderr: "corrupt".into(),
                });
            }
            let mut assets = Vec::new();
            let mut markdown = std::fs::read_to_string(input).unwrap();
            for n in 0..self.figures {
                let p = assets_dir.join(format!("fig{n}.png"));
                std::fs::write(&p, b"png").unwrap();
                assets.push(p);
                markdown.push_str(assets::IMAGE_PLACEHOLDER);
            }
            Ok(RenderedDocument { markdown, assets })
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        stored: Vec<(String, usize)>,
    }

    impl AssetStore for RecordingStore {
        fn persist(&mut self, id: &str, index: usize, _source: &Path) -> Result<String, ConvertError> {
            self.stored.push((id.to_string(), index));
            Ok(format!("https://cdn/{id}-{index}"))
        }
    }

    fn work_item(root: &Path, id: &str) -> WorkItem {
        let scratch_dir = root.join(format!("{id}_scratch"));
        std::fs::create_dir_all(&scratch_dir).unwrap();
        let payload_path = scratch_dir.join(format!("{id}.pdf"));
        std::fs::write(&payload_path, format!("# {id}")).unwrap();
        WorkItem {
            id: id.into(),
            payload_path,
            scratch_dir,
        }
    }

    #[test]
    fn item_failure_does_not_stop_the_batch() {
        let root = tempfile::tempdir().unwrap();
        let items = vec![
            work_item(root.path(), "a"),
            work_item(root.path(), "bad1"),
            work_item(root.path(), "c"),
        ];
        let mut conv = FakeConverter::default();
        let results = run_batch(&items, &mut conv, None);

        assert_eq!(conv.calls, 3);
        assert_eq!(results[0], ConversionResult::success("a", "# a"));
        assert!(matches!(
            &results[1],
            ConversionResult::Failure { error: ItemError::Conversion { detail }, .. }
                if detail.contains("corrupt")
        ));
        assert!(results[2].is_success());
        assert!(items.iter().all(|i| !i.scratch_dir.exists()));
    }

    #[test]
    fn init_failure_fails_every_item_and_releases_scratch() {
        let root = tempfile::tempdir().unwrap();
        let items = vec![work_item(root.path(), "a"), work_item(root.path(), "b")];
        let mut conv = FakeConverter {
            fail_init: true,
            ..FakeConverter::default()
        };
        let results = run_batch(&items, &mut conv, None);
        assert_eq!(conv.calls, 0);
        assert!(results.iter().all(|r| matches!(
            r,
            ConversionResult::Failure { error: ItemError::BatchInit { .. }, .. }
        )));
        assert!(items.iter().all(|i| !i.scratch_dir.exists()));
    }

    #[test]
    fn missing_payload_skips_the_converter() {
        let root = tempfile::tempdir().unwrap();
        let item = WorkItem {
            id: "ghost".into(),
            payload_path: PathBuf::from("/nonexistent/ghost.pdf"),
            scratch_dir: root.path().join("ghost_scratch"),
        };
        let mut conv = FakeConverter::default();
        let results = run_batch(&[item], &mut conv, None);
        assert_eq!(conv.calls, 0);
        assert!(matches!(
            &results[0],
            ConversionResult::Failure { error: ItemError::PayloadMissing { .. }, .. }
        ));
    }

    #[test]
    fn assets_replace_placeholders() {
        let root = tempfile::tempdir().unwrap();
        let items = vec![work_item(root.path(), "p")];
        let mut conv = FakeConverter {
            figures: 2,
            ..FakeConverter::default()
        };
        let mut store = RecordingStore::default();
        let results = run_batch(&items, &mut conv, Some(&mut store as &mut dyn AssetStore));
        assert_eq!(
            results[0],
            ConversionResult::success(
                "p",
                "# p![image](https://cdn/p-1)![image](https://cdn/p-2)"
            )
        );
        assert_eq!(store.stored, vec![("p".to_string(), 1), ("p".to_string(), 2)]);
    }

    #[test]
    fn invalid_request_is_a_worker_error() {
        let mut out = Vec::new();
        let err = run_worker("not json".as_bytes(), &mut out).unwrap_err();
        assert!(matches!(err, WorkerError::InvalidRequest(_)));
        assert!(out.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn run_worker_answers_with_one_line() {
        let root = tempfile::tempdir().unwrap();
        let request = BatchRequest {
            worker_id: 7,
            items: vec![work_item(root.path(), "a")],
            converter: ConverterSpec {
                program: "cat".into(),
                args: vec!["{input}".into()],
            },
            assets: None,
        };
        let input = serde_json::to_vec(&request).unwrap();
        let mut out = Vec::new();
        run_worker(input.as_slice(), &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 1);
        let response: BatchResponse = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(response.worker_id, 7);
        assert_eq!(response.results, vec![ConversionResult::success("a", "# a")]);
    }
}
