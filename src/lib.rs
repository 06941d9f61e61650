//! # pdf2md-batch
//!
//! Resumable, crash-isolated batch conversion of a month of arXiv PDFs into
//! an append-only Markdown JSONL log.
//!
//! ## Why this crate?
//!
//! Converting tens of thousands of PDFs is dominated by two hostile
//! resources: downloads that are slow or fail outright, and a conversion
//! step that is expensive, occasionally hangs and sometimes crashes hard.
//! A run must survive both, never convert an item twice, and pick up where
//! it left off after an interruption. This crate keeps downloading ahead of
//! conversion within a fixed memory bound, runs every batch in a fresh OS
//! process it can kill, and records every resolved item in a checkpoint
//! before moving on.
//!
//! ## Pipeline Overview
//!
//! ```text
//! bucket listing
//!  │
//!  ├─ 1. Discover  collapse versions, drop checkpointed ids
//!  ├─ 2. Fetch     background producer → bounded prefetch queue
//!  ├─ 3. Batch     gather up to batch_size items
//!  ├─ 4. Convert   fresh worker process per batch, deadline + SIGTERM/SIGKILL
//!  └─ 5. Commit    output log first, then checkpoint; release scratch
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2md_batch::{GcsLister, HttpFetcher, Period, PipelineConfig, RunController};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .period(Period::new(21, 1)?)
//!         .output_dir("./data")
//!         .batch_size(4)
//!         .build()?;
//!     let summary = RunController::open(config)?
//!         .run(&GcsLister::arxiv()?, Arc::new(HttpFetcher::new()?))
//!         .await?;
//!     eprintln!("{} converted, {} failed", summary.stats.converted, summary.stats.failed);
//!     Ok(())
//! }
//! ```
//!
//! The worker process is, by default, the running executable's hidden
//! `worker` subcommand. Library users embedding the controller in another
//! binary set [`PipelineConfigBuilder::worker`] to something that calls
//! [`worker::run_worker`] on its stdin and stdout.
//!
//! ## Durable State
//!
//! | File | Contents |
//! |------|----------|
//! | `jsonls/arxiv_YYMM.jsonl` | `{"arxiv_id", "markdown"}` per successful item |
//! | `checkpoints/arxiv_YYMM.checkpoint` | every resolved identifier, success or failure |
//! | `checkpoints/arxiv_YYMM.attempts` | batch-level failures not yet checkpointed |
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2md-batch` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod controller;
pub mod error;
pub mod item;
pub mod pipeline;
pub mod progress;
pub mod source;
pub mod stats;
pub mod store;
pub mod worker;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    AssetSpec, ConverterSpec, Period, PipelineConfig, PipelineConfigBuilder, WorkerCommand,
};
pub use controller::RunController;
pub use error::{ConvertError, FetchError, ItemError, ListError, PipelineError, WorkerError};
pub use item::{ConversionResult, FetchedItem, ItemDescriptor, OutputRecord, ScratchDir};
pub use progress::{NoopProgressCallback, ProgressCallback, RunProgressCallback};
pub use source::{DirectoryLister, Fetcher, GcsLister, HttpFetcher, ItemLister, LocalFetcher};
pub use stats::{RunStats, RunSummary};
pub use worker::run_worker;
