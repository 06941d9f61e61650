//! Configuration types for a batch conversion run.
//!
//! All run behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. Setters clamp obviously out-of-range
//! values; [`PipelineConfigBuilder::build`] rejects the rest.

use crate::error::PipelineError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// The month of submissions a run covers, e.g. `2101` for January 2021.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    /// Two-digit year (`21` for 2021).
    pub year: u8,
    /// Month, 1–12.
    pub month: u8,
}

impl Period {
    pub fn new(year: u8, month: u8) -> Result<Self, PipelineError> {
        if year > 99 {
            return Err(PipelineError::InvalidConfig(format!(
                "year must be two digits (00–99), got {year}"
            )));
        }
        if !(1..=12).contains(&month) {
            return Err(PipelineError::InvalidConfig(format!(
                "month must be 1–12, got {month}"
            )));
        }
        Ok(Self { year, month })
    }

    /// Parse the `--year` / `--month` strings the CLI accepts
    /// (`"21"` / `"1"` or `"01"`). Four-digit years are shortened.
    pub fn parse(year: &str, month: &str) -> Result<Self, PipelineError> {
        let year: u16 = year
            .trim()
            .parse()
            .map_err(|_| PipelineError::InvalidConfig(format!("invalid year '{year}'")))?;
        let month: u8 = month
            .trim()
            .parse()
            .map_err(|_| PipelineError::InvalidConfig(format!("invalid month '{month}'")))?;
        let year = if year >= 1000 { year % 100 } else { year };
        Self::new(year as u8, month)
    }

    /// `YYMM`, the directory name used by the arXiv bucket.
    pub fn prefix(&self) -> String {
        format!("{:02}{:02}", self.year, self.month)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "20{:02}-{:02}", self.year, self.month)
    }
}

/// How to launch the isolated worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// The running executable's own hidden `worker` subcommand.
    pub fn current_exe() -> Self {
        let program =
            std::env::current_exe().unwrap_or_else(|_| PathBuf::from("pdf2md-batch"));
        Self::new(program, ["worker"])
    }
}

/// The external conversion tool the worker drives.
///
/// Arguments may contain the placeholders `{input}` (payload path),
/// `{assets}` (a per-item directory the tool may write figures into) and
/// `{id}` (item identifier). The tool must print Markdown on stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConverterSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for ConverterSpec {
    fn default() -> Self {
        Self {
            program: "pdf2md".to_string(),
            args: vec!["--no-progress".to_string(), "{input}".to_string()],
        }
    }
}

/// Where extracted figures are persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetSpec {
    pub dir: PathBuf,
    /// Public base URL the stored file names are appended to. When absent
    /// the locator is the stored file's path.
    pub public_base_url: Option<String>,
}

/// Configuration for one batch conversion run.
#[derive(Clone)]
pub struct PipelineConfig {
    pub period: Period,

    /// Root of `jsonls/`, `checkpoints/` and (by default) scratch storage.
    pub output_dir: PathBuf,

    /// Items per worker process. Default: 1.
    pub batch_size: usize,

    /// Queue capacity = `prefetch_factor × batch_size`. Default: 3.
    pub prefetch_factor: usize,

    /// Budget per item; the batch deadline is this times the batch size.
    /// Default: 300 s.
    pub item_timeout: Duration,

    /// Bound on a single download. Default: 120 s.
    pub fetch_timeout: Duration,

    /// How long the aggregator waits on an empty queue before checking
    /// whether the producer is still alive. Default: 600 s.
    pub idle_timeout: Duration,

    /// Time between SIGTERM and SIGKILL. Default: 5 s.
    pub grace_period: Duration,

    /// How long to wait for the kernel to reap a killed worker. Default: 1 s.
    pub kill_wait: Duration,

    /// Batch-level failures tolerated per item before it is checkpointed.
    /// Default: 1 (checkpoint on the first one).
    pub max_batch_attempts: u32,

    /// Parent of the run's scratch directory. `None` uses the system temp dir.
    pub scratch_root: Option<PathBuf>,

    pub worker: WorkerCommand,
    pub converter: ConverterSpec,
    pub assets: Option<AssetSpec>,

    /// Value for `CUDA_VISIBLE_DEVICES` in the worker's environment.
    pub accelerator_device: Option<String>,

    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            period: Period { year: 21, month: 1 },
            output_dir: PathBuf::from("./data"),
            batch_size: 1,
            prefetch_factor: 3,
            item_timeout: Duration::from_secs(300),
            fetch_timeout: Duration::from_secs(120),
            idle_timeout: Duration::from_secs(600),
            grace_period: Duration::from_secs(5),
            kill_wait: Duration::from_secs(1),
            max_batch_attempts: 1,
            scratch_root: None,
            worker: WorkerCommand::current_exe(),
            converter: ConverterSpec::default(),
            assets: None,
            accelerator_device: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("period", &self.period)
            .field("output_dir", &self.output_dir)
            .field("batch_size", &self.batch_size)
            .field("prefetch_factor", &self.prefetch_factor)
            .field("item_timeout", &self.item_timeout)
            .field("fetch_timeout", &self.fetch_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .field("grace_period", &self.grace_period)
            .field("max_batch_attempts", &self.max_batch_attempts)
            .field("worker", &self.worker)
            .field("converter", &self.converter)
            .field("assets", &self.assets)
            .field("accelerator_device", &self.accelerator_device)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn RunProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Capacity of the prefetch queue.
    pub fn queue_capacity(&self) -> usize {
        self.prefetch_factor * self.batch_size
    }

    /// Deadline for a batch of `len` items, saturating at `Duration::MAX`.
    pub fn batch_deadline(&self, len: usize) -> Duration {
        self.checked_batch_deadline(len).unwrap_or(Duration::MAX)
    }

    fn checked_batch_deadline(&self, len: usize) -> Option<Duration> {
        let len = u32::try_from(len.max(1)).ok()?;
        self.item_timeout.checked_mul(len)
    }

    fn stem(&self) -> String {
        format!("arxiv_{}", self.period.prefix())
    }

    /// `<output>/jsonls/arxiv_YYMM.jsonl`
    pub fn dataset_path(&self) -> PathBuf {
        self.output_dir
            .join("jsonls")
            .join(format!("{}.jsonl", self.stem()))
    }

    /// `<output>/checkpoints/arxiv_YYMM.checkpoint`
    pub fn checkpoint_path(&self) -> PathBuf {
        self.output_dir
            .join("checkpoints")
            .join(format!("{}.checkpoint", self.stem()))
    }

    /// `<output>/checkpoints/arxiv_YYMM.attempts`
    pub fn attempts_path(&self) -> PathBuf {
        self.output_dir
            .join("checkpoints")
            .join(format!("{}.attempts", self.stem()))
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn period(mut self, period: Period) -> Self {
        self.config.period = period;
        self
    }

    pub fn output_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.config.output_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.batch_size = n.max(1);
        self
    }

    pub fn prefetch_factor(mut self, n: usize) -> Self {
        self.config.prefetch_factor = n.max(1);
        self
    }

    pub fn item_timeout(mut self, timeout: Duration) -> Self {
        self.config.item_timeout = timeout;
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.config.fetch_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    pub fn grace_period(mut self, grace: Duration) -> Self {
        self.config.grace_period = grace;
        self
    }

    pub fn kill_wait(mut self, wait: Duration) -> Self {
        self.config.kill_wait = wait;
        self
    }

    pub fn max_batch_attempts(mut self, n: u32) -> Self {
        self.config.max_batch_attempts = n.max(1);
        self
    }

    pub fn scratch_root(mut self, dir: impl AsRef<Path>) -> Self {
        self.config.scratch_root = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn worker(mut self, worker: WorkerCommand) -> Self {
        self.config.worker = worker;
        self
    }

    pub fn converter(mut self, converter: ConverterSpec) -> Self {
        self.config.converter = converter;
        self
    }

    pub fn assets(mut self, assets: AssetSpec) -> Self {
        self.config.assets = Some(assets);
        self
    }

    pub fn accelerator_device(mut self, device: impl Into<String>) -> Self {
        self.config.accelerator_device = Some(device.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.batch_size == 0 || c.prefetch_factor == 0 {
            return Err(PipelineError::InvalidConfig(
                "batch size and prefetch factor must be ≥ 1".into(),
            ));
        }
        for (name, value) in [
            ("item timeout", c.item_timeout),
            ("fetch timeout", c.fetch_timeout),
            ("idle timeout", c.idle_timeout),
        ] {
            if value.is_zero() {
                return Err(PipelineError::InvalidConfig(format!(
                    "{name} must be greater than zero"
                )));
            }
        }
        if c.converter.program.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "converter program must not be empty".into(),
            ));
        }
        let Some(deadline) = c.checked_batch_deadline(c.batch_size) else {
            return Err(PipelineError::InvalidConfig(format!(
                "item timeout {:?} × batch size {} overflows the batch deadline",
                c.item_timeout, c.batch_size
            )));
        };
        if c.fetch_timeout >= deadline {
            warn!(
                "Fetch timeout {:?} is not shorter than the batch deadline {:?}",
                c.fetch_timeout, deadline
            );
        }
        Ok(self.config)
    }
}
