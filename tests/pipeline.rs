//! Whole-run integration tests.
//!
//! Each test lays out a local mirror (`<root>/2101/<id>.pdf`), runs the
//! controller with the real `pdf2md-batch worker` as the isolated process
//! and a shell one-liner as the conversion tool, then inspects the output
//! log and checkpoint on disk.

#![cfg(unix)]

use pdf2md_batch::{
    ConversionResult, ConverterSpec, DirectoryLister, FetchError, FetchedItem, Fetcher,
    ItemDescriptor, ItemError, LocalFetcher, OutputRecord, Period, PipelineConfig,
    RunController, RunProgressCallback, RunSummary, WorkerCommand,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// ── Test helpers ─────────────────────────────────────────────────────────────

struct Workspace {
    _dir: tempfile::TempDir,
    mirror: PathBuf,
    output: PathBuf,
    scratch: PathBuf,
}

impl Workspace {
    fn new(ids: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mirror = dir.path().join("mirror");
        let month = mirror.join("2101");
        std::fs::create_dir_all(&month).unwrap();
        for id in ids {
            std::fs::write(month.join(format!("{id}.pdf")), format!("# Paper {id}\n")).unwrap();
        }
        Self {
            output: dir.path().join("out"),
            scratch: dir.path().join("scratch"),
            mirror,
            _dir: dir,
        }
    }

    fn config(&self) -> pdf2md_batch::PipelineConfigBuilder {
        PipelineConfig::builder()
            .period(Period::new(21, 1).unwrap())
            .output_dir(&self.output)
            .scratch_root(&self.scratch)
            .worker(WorkerCommand::new(
                env!("CARGO_BIN_EXE_pdf2md-batch"),
                ["worker", "--log-level", "warn"],
            ))
            .converter(shell_converter(r#"cat "$1""#))
            .item_timeout(Duration::from_secs(30))
            .grace_period(Duration::from_millis(300))
            .kill_wait(Duration::from_secs(1))
            .idle_timeout(Duration::from_secs(5))
    }

    fn lister(&self) -> DirectoryLister {
        DirectoryLister::new(&self.mirror)
    }

    fn output_records(&self) -> Vec<OutputRecord> {
        let path = self.output.join("jsonls/arxiv_2101.jsonl");
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    fn checkpoint_lines(&self) -> Vec<String> {
        let path = self.output.join("checkpoints/arxiv_2101.checkpoint");
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn scratch_is_empty(&self) -> bool {
        std::fs::read_dir(&self.scratch)
            .map(|mut d| d.next().is_none())
            .unwrap_or(true)
    }

    async fn run(&self, config: PipelineConfig) -> RunSummary {
        self.run_with(config, Arc::new(LocalFetcher)).await
    }

    async fn run_with(&self, config: PipelineConfig, fetcher: Arc<dyn Fetcher>) -> RunSummary {
        RunController::open(config)
            .unwrap()
            .run(&self.lister(), fetcher)
            .await
            .unwrap()
    }
}

/// `sh -c '<script>' sh {input} {id}`
fn shell_converter(script: &str) -> ConverterSpec {
    ConverterSpec {
        program: "sh".into(),
        args: vec![
            "-c".into(),
            script.into(),
            "sh".into(),
            "{input}".into(),
            "{id}".into(),
        ],
    }
}

fn ids(records: &[OutputRecord]) -> HashSet<String> {
    records.iter().map(|r| r.arxiv_id.clone()).collect()
}

fn set(items: &[&str]) -> HashSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Delegates to [`LocalFetcher`] except for the listed ids.
struct FailingFetcher {
    fail: Vec<String>,
}

#[async_trait::async_trait]
impl Fetcher for FailingFetcher {
    async fn fetch(
        &self,
        item: &ItemDescriptor,
        scratch_root: &Path,
    ) -> Result<FetchedItem, FetchError> {
        if self.fail.contains(&item.id) {
            return Err(FetchError::Status {
                locator: item.locator.clone(),
                status: 404,
            });
        }
        LocalFetcher.fetch(item, scratch_root).await
    }
}

#[derive(Default)]
struct Recorder {
    resolved: Mutex<Vec<ConversionResult>>,
    batch_sizes: Mutex<Vec<usize>>,
}

impl RunProgressCallback for Recorder {
    fn on_batch_start(&self, _batch_num: usize, size: usize) {
        self.batch_sizes.lock().unwrap().push(size);
    }

    fn on_item_resolved(&self, result: &ConversionResult) {
        self.resolved.lock().unwrap().push(result.clone());
    }
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fetch_failure_is_checkpointed_and_others_are_converted() {
    let ws = Workspace::new(&["2101.00001v1", "2101.00002v1", "2101.00003v1"]);
    let config = ws.config().batch_size(2).prefetch_factor(1).build().unwrap();
    let fetcher = Arc::new(FailingFetcher {
        fail: vec!["2101.00002v1".into()],
    });

    let summary = ws.run_with(config, fetcher).await;

    let records = ws.output_records();
    assert_eq!(ids(&records), set(&["2101.00001v1", "2101.00003v1"]));
    assert_eq!(records[0].markdown.trim_end(), format!("# Paper {}", records[0].arxiv_id));
    assert_eq!(
        ws.checkpoint_lines().into_iter().collect::<HashSet<_>>(),
        set(&["2101.00001v1", "2101.00002v1", "2101.00003v1"])
    );
    assert_eq!(summary.stats.fetch_failures, 1);
    assert_eq!(summary.stats.converted, 2);
    assert_eq!(summary.checkpointed, 3);
    assert!(ws.scratch_is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn hanging_worker_times_out_whole_batch() {
    let ws = Workspace::new(&["2101.00001v1", "2101.00002v1", "2101.00003v1"]);
    let recorder = Arc::new(Recorder::default());
    let config = ws
        .config()
        .batch_size(3)
        .worker(WorkerCommand::new("sh", ["-c", "sleep 30"]))
        .item_timeout(Duration::from_millis(200))
        .progress_callback(recorder.clone())
        .build()
        .unwrap();

    let started = Instant::now();
    let summary = ws.run(config).await;
    // deadline 600ms + grace 300ms + kill wait, with slack for process start
    assert!(started.elapsed() < Duration::from_secs(5));

    assert!(ws.output_records().is_empty());
    assert_eq!(ws.checkpoint_lines().len(), 3);
    assert_eq!(summary.stats.timed_out_batches, 1);
    let resolved = recorder.resolved.lock().unwrap();
    assert_eq!(resolved.len(), 3);
    for r in resolved.iter() {
        match r {
            ConversionResult::Failure { error, .. } => {
                assert!(matches!(error, ItemError::BatchTimeout { .. }));
                assert!(error.to_string().starts_with("Batch timeout"));
            }
            other => panic!("expected timeout failure, got {other:?}"),
        }
    }
    assert!(ws.scratch_is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rerun_only_processes_unfinished_items() {
    let all: Vec<String> = (1..=10).map(|n| format!("2101.{n:05}v1")).collect();
    let refs: Vec<&str> = all.iter().map(String::as_str).collect();
    let ws = Workspace::new(&refs);

    let checkpoint = ws.output.join("checkpoints/arxiv_2101.checkpoint");
    std::fs::create_dir_all(checkpoint.parent().unwrap()).unwrap();
    std::fs::write(&checkpoint, all[..5].join("\n") + "\n").unwrap();

    let config = ws.config().batch_size(2).build().unwrap();
    let summary = ws.run(config).await;

    assert_eq!(summary.stats.previously_checkpointed, 5);
    assert_eq!(summary.stats.pending, 5);
    assert_eq!(summary.checkpointed, 10);
    assert_eq!(ids(&ws.output_records()), all[5..].iter().cloned().collect());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_run_adds_nothing() {
    let ws = Workspace::new(&["2101.00001v1", "2101.00002v1", "2101.00003v1"]);

    let first = ws.run(ws.config().batch_size(2).build().unwrap()).await;
    assert_eq!(first.stats.converted, 3);
    let second = ws.run(ws.config().batch_size(2).build().unwrap()).await;
    assert_eq!(second.stats.pending, 0);
    assert_eq!(second.stats.batches, 0);

    let records = ws.output_records();
    assert_eq!(records.len(), 3);
    assert_eq!(ids(&records).len(), 3);
    let checkpoint = ws.checkpoint_lines();
    assert_eq!(checkpoint.len(), 3);
    assert_eq!(checkpoint.iter().collect::<HashSet<_>>().len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn batches_are_full_except_the_last() {
    let names: Vec<String> = (1..=7).map(|n| format!("2101.{n:05}v1")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let ws = Workspace::new(&refs);
    let recorder = Arc::new(Recorder::default());
    let config = ws
        .config()
        .batch_size(3)
        .prefetch_factor(1)
        .progress_callback(recorder.clone())
        .build()
        .unwrap();

    let summary = ws.run(config).await;
    assert_eq!(summary.stats.converted, 7);
    assert_eq!(*recorder.batch_sizes.lock().unwrap(), vec![3, 3, 1]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn item_failure_is_checkpointed_without_output() {
    let ws = Workspace::new(&["2101.00001v1", "2101.00002v1"]);
    let config = ws
        .config()
        .batch_size(2)
        .converter(shell_converter(
            r#"case "$2" in *00002*) echo 'corrupt xref' >&2; exit 1;; esac; cat "$1""#,
        ))
        .build()
        .unwrap();

    let summary = ws.run(config).await;
    assert_eq!(ids(&ws.output_records()), set(&["2101.00001v1"]));
    assert_eq!(ws.checkpoint_lines().len(), 2);
    assert_eq!(summary.stats.failed, 1);
    assert_eq!(summary.stats.timed_out_batches, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn latest_version_only() {
    let ws = Workspace::new(&["2101.00001v1", "2101.00001v2", "2101.00002v1"]);
    let summary = ws.run(ws.config().batch_size(4).build().unwrap()).await;
    assert_eq!(summary.stats.listed_files, 3);
    assert_eq!(summary.stats.unique_items, 2);
    assert_eq!(
        ids(&ws.output_records()),
        set(&["2101.00001v2", "2101.00002v1"])
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_converter_fails_the_batch() {
    let ws = Workspace::new(&["2101.00001v1", "2101.00002v1"]);
    let config = ws
        .config()
        .batch_size(2)
        .converter(ConverterSpec {
            program: "no-such-converter-binary".into(),
            args: vec!["{input}".into()],
        })
        .build()
        .unwrap();

    let summary = ws.run(config).await;
    assert!(ws.output_records().is_empty());
    assert_eq!(summary.stats.failed, 2);
    assert_eq!(ws.checkpoint_lines().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn attempt_budget_defers_batch_failures_to_next_run() {
    let ws = Workspace::new(&["2101.00001v1"]);
    let hanging = || {
        ws.config()
            .worker(WorkerCommand::new("sh", ["-c", "sleep 30"]))
            .item_timeout(Duration::from_millis(200))
            .max_batch_attempts(2)
            .build()
            .unwrap()
    };

    let first = ws.run(hanging()).await;
    assert_eq!(first.stats.deferred, 1);
    assert!(ws.checkpoint_lines().is_empty());

    let second = ws.run(hanging()).await;
    assert_eq!(second.stats.pending, 1);
    assert_eq!(second.stats.failed, 1);
    assert_eq!(ws.checkpoint_lines(), vec!["2101.00001v1".to_string()]);
}
