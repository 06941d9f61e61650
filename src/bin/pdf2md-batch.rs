//! CLI binary for pdf2md-batch.
//!
//! A thin shim over the library crate: `run` maps flags to a
//! `PipelineConfig` and drives a `RunController`; the hidden `worker`
//! subcommand is the isolated process each batch runs in.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use pdf2md_batch::{
    run_worker, AssetSpec, ConversionResult, ConverterSpec, DirectoryLister, Fetcher, GcsLister,
    HttpFetcher, ItemLister, LocalFetcher, Period, PipelineConfig, ProgressCallback,
    RunController, RunProgressCallback, RunStats, WorkerCommand,
};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Renders one bar over all pending items plus a line per failure.
struct CliProgressCallback {
    bar: ProgressBar,
    failures: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Listing");
        bar.set_message("Discovering items…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            failures: AtomicUsize::new(0),
        })
    }

    fn truncate(msg: &str) -> String {
        match msg.char_indices().nth(79) {
            Some((i, _)) => format!("{}\u{2026}", &msg[..i]),
            None => msg.to_string(),
        }
    }
}

impl RunProgressCallback for CliProgressCallback {
    fn on_run_start(&self, pending: usize, already_done: usize) {
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>5}/{len} items  \
                 ⏱ {elapsed_precise}  ETA {eta_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_length(pending as u64);
        self.bar.set_prefix("Converting");
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}  {}",
            cyan("◆"),
            bold(&format!("{pending} items to convert")),
            dim(&format!("({already_done} already checkpointed)"))
        ));
    }

    fn on_fetch_failed(&self, id: &str, error: &str) {
        self.failures.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} {:<18}  {}",
            red("✗"),
            id,
            red(&Self::truncate(&format!("download: {error}")))
        ));
        self.bar.inc(1);
    }

    fn on_batch_start(&self, batch_num: usize, size: usize) {
        self.bar
            .set_message(format!("batch {batch_num} ({size} items)"));
    }

    fn on_item_resolved(&self, result: &ConversionResult) {
        match result {
            ConversionResult::Success { id, markdown } => {
                self.bar.println(format!(
                    "  {} {:<18}  {}",
                    green("✓"),
                    id,
                    dim(&format!("{:>7} chars", markdown.len()))
                ));
            }
            ConversionResult::Failure { id, error } => {
                self.failures.fetch_add(1, Ordering::SeqCst);
                let mark = if error.is_batch_level() {
                    yellow("⚠")
                } else {
                    red("✗")
                };
                self.bar.println(format!(
                    "  {} {:<18}  {}",
                    mark,
                    id,
                    red(&Self::truncate(&error.to_string()))
                ));
            }
        }
        self.bar.inc(1);
    }

    fn on_run_complete(&self, stats: &RunStats) {
        self.bar.finish_and_clear();
        let failed = self.failures.load(Ordering::SeqCst);
        if failed == 0 {
            eprintln!(
                "{} {} items converted successfully",
                green("✔"),
                bold(&stats.converted.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} items converted  ({} failed)",
                if stats.converted == 0 && stats.pending > 0 {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&stats.converted.to_string()),
                stats.pending,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert January 2021 from the public arXiv bucket
  pdf2md-batch run --year 21 --month 01

  # Bigger batches, shorter per-item budget, second GPU
  pdf2md-batch run --year 21 --month 01 --batch-size 8 --timeout-per-item 120 --device 1

  # Offline run over a local mirror laid out as <dir>/<YYMM>/<id>.pdf
  pdf2md-batch run --year 21 --month 01 --source /mnt/arxiv/pdf

  # Persist extracted figures and link them from a CDN
  pdf2md-batch run --year 21 --month 01 \
      --assets-dir ./data/assets --assets-base-url https://cdn.example.org/arxiv \
      --converter my-converter --images {assets} {input}

  # Give items up to three worker crashes/timeouts before skipping them
  pdf2md-batch run --year 21 --month 01 --max-batch-attempts 3

OUTPUT:
  <output>/jsonls/arxiv_YYMM.jsonl              one {"arxiv_id","markdown"} per line
  <output>/checkpoints/arxiv_YYMM.checkpoint    resolved identifiers (rerun-safe)
  <output>/checkpoints/arxiv_YYMM.attempts      batch-level failures awaiting retry

CONVERTER:
  The converter is run once per item and must print Markdown on stdout.
  Placeholders in its arguments: {input} payload path, {assets} directory for
  extracted figures, {id} item identifier. Figures are matched, in file-name
  order, to <!-- image --> markers in the Markdown. --converter takes every
  remaining argument, so pass it last.

ENVIRONMENT VARIABLES:
  RUST_LOG                    Override the log filter
  PDF2MD_BATCH_*              Defaults for the run flags (see --help)
"#;

/// Resumable batch conversion of arXiv PDFs to Markdown.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2md-batch",
    version,
    about = "Resumable, crash-isolated batch conversion of arXiv PDFs to Markdown",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert every pending item of one month.
    Run(RunArgs),

    /// Serve one batch on stdin/stdout (spawned by `run`).
    #[command(hide = true)]
    Worker(WorkerArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Year, two digits (21 for 2021).
    #[arg(long, env = "PDF2MD_BATCH_YEAR")]
    year: String,

    /// Month (01–12).
    #[arg(long, env = "PDF2MD_BATCH_MONTH")]
    month: String,

    /// Output directory root.
    #[arg(short, long, env = "PDF2MD_BATCH_OUTPUT", default_value = "./data")]
    output: PathBuf,

    /// Items processed per worker process.
    #[arg(long, env = "PDF2MD_BATCH_SIZE", default_value_t = 1)]
    batch_size: usize,

    /// Download queue size factor (queue capacity = prefetch × batch size).
    #[arg(long, env = "PDF2MD_BATCH_PREFETCH", default_value_t = 3)]
    prefetch: usize,

    /// Seconds allowed per item; the batch deadline is this × batch size.
    #[arg(long, env = "PDF2MD_BATCH_TIMEOUT_PER_ITEM", default_value_t = 300)]
    timeout_per_item: u64,

    /// Seconds allowed per download.
    #[arg(long, env = "PDF2MD_BATCH_FETCH_TIMEOUT", default_value_t = 120)]
    fetch_timeout: u64,

    /// Seconds to wait on an empty queue before checking the downloader.
    #[arg(long, env = "PDF2MD_BATCH_IDLE_TIMEOUT", default_value_t = 600)]
    idle_timeout: u64,

    /// Seconds between SIGTERM and SIGKILL for a worker past its deadline.
    #[arg(long, env = "PDF2MD_BATCH_GRACE_PERIOD", default_value_t = 5)]
    grace_period: u64,

    /// Worker crashes/timeouts tolerated per item before it is skipped for good.
    #[arg(long, env = "PDF2MD_BATCH_MAX_ATTEMPTS", default_value_t = 1)]
    max_batch_attempts: u32,

    /// `gcs` for the public arXiv bucket, or a local directory mirror.
    #[arg(long, env = "PDF2MD_BATCH_SOURCE", default_value = "gcs")]
    source: String,

    /// Scratch storage parent directory (default: system temp dir).
    #[arg(long, env = "PDF2MD_BATCH_SCRATCH")]
    scratch: Option<PathBuf>,

    /// Directory extracted figures are stored in.
    #[arg(long, env = "PDF2MD_BATCH_ASSETS_DIR")]
    assets_dir: Option<PathBuf>,

    /// Public URL prefix for stored figures.
    #[arg(long, env = "PDF2MD_BATCH_ASSETS_BASE_URL", requires = "assets_dir")]
    assets_base_url: Option<String>,

    /// Accelerator the worker is bound to (CUDA_VISIBLE_DEVICES).
    #[arg(long, env = "PDF2MD_BATCH_DEVICE", default_value = "0")]
    device: String,

    /// Output the run summary as JSON on stdout.
    #[arg(long, env = "PDF2MD_BATCH_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2MD_BATCH_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2MD_BATCH_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2MD_BATCH_QUIET")]
    quiet: bool,

    /// Conversion tool and its arguments (default: `pdf2md --no-progress {input}`).
    #[arg(
        long,
        num_args = 1..,
        allow_hyphen_values = true,
        value_name = "PROGRAM [ARGS]..."
    )]
    converter: Vec<String>,
}

#[derive(Args, Debug)]
struct WorkerArgs {
    /// Log filter, passed down from `run`.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Worker(args) => worker(args),
        Command::Run(args) => run(args).await,
    }
}

fn init_tracing(filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();
}

/// Stdout is the result channel; everything else goes to stderr.
fn worker(args: WorkerArgs) -> Result<()> {
    init_tracing(&args.log_level);
    tokio::task::block_in_place(|| run_worker(io::stdin().lock(), io::stdout().lock()))
        .context("Worker failed")
}

async fn run(args: RunArgs) -> Result<()> {
    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = !args.quiet && !args.no_progress && !args.json;
    let filter = if args.verbose {
        "debug"
    } else if args.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    init_tracing(filter);

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn RunProgressCallback>)
    } else {
        None
    };

    let config = build_config(&args, filter, progress_cb)?;
    let (lister, fetcher) = build_source(&args.source)?;

    let summary = RunController::open(config)
        .context("Failed to prepare run state")?
        .run(&*lister, fetcher)
        .await
        .context("Run failed")?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
        );
    } else if !args.quiet && !show_progress {
        let s = &summary.stats;
        eprintln!(
            "Processed {} of {} pending items for {} in {}ms",
            s.attempted(),
            s.pending,
            summary.period,
            summary.duration_ms
        );
        eprintln!(
            "  {} converted, {} failed, {} download failures, {} deferred, {} timed-out batches",
            s.converted, s.failed, s.fetch_failures, s.deferred, s.timed_out_batches
        );
    }
    if !args.quiet && !args.json {
        eprintln!(
            "   {}  {}",
            bold(&summary.dataset_path.display().to_string()),
            dim(&format!("checkpoint holds {} items", summary.checkpointed)),
        );
    }

    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(
    args: &RunArgs,
    log_filter: &str,
    progress: Option<ProgressCallback>,
) -> Result<PipelineConfig> {
    let period = Period::parse(&args.year, &args.month).context("Invalid period")?;

    let worker_exe = std::env::current_exe().context("Cannot locate own executable")?;
    let worker = WorkerCommand::new(worker_exe, ["worker", "--log-level", log_filter]);

    let mut builder = PipelineConfig::builder()
        .period(period)
        .output_dir(&args.output)
        .batch_size(args.batch_size)
        .prefetch_factor(args.prefetch)
        .item_timeout(Duration::from_secs(args.timeout_per_item))
        .fetch_timeout(Duration::from_secs(args.fetch_timeout))
        .idle_timeout(Duration::from_secs(args.idle_timeout))
        .grace_period(Duration::from_secs(args.grace_period))
        .max_batch_attempts(args.max_batch_attempts)
        .worker(worker)
        .accelerator_device(args.device.clone());

    if let Some((program, rest)) = args.converter.split_first() {
        builder = builder.converter(ConverterSpec {
            program: program.clone(),
            args: rest.to_vec(),
        });
    }
    if let Some(dir) = &args.assets_dir {
        builder = builder.assets(AssetSpec {
            dir: dir.clone(),
            public_base_url: args.assets_base_url.clone(),
        });
    }
    if let Some(scratch) = &args.scratch {
        builder = builder.scratch_root(scratch);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn build_source(source: &str) -> Result<(Box<dyn ItemLister>, Arc<dyn Fetcher>)> {
    if source.eq_ignore_ascii_case("gcs") {
        let lister = GcsLister::arxiv().context("Failed to create bucket lister")?;
        let fetcher = HttpFetcher::new().context("Failed to create downloader")?;
        return Ok((Box::new(lister), Arc::new(fetcher)));
    }
    let root = PathBuf::from(source);
    if !root.is_dir() {
        anyhow::bail!("--source must be 'gcs' or an existing directory (got '{}')", source);
    }
    Ok((Box::new(DirectoryLister::new(root)), Arc::new(LocalFetcher)))
}
