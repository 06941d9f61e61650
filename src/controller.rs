//! The run controller: one explicit object owning all run state.
//!
//! [`RunController::open`] loads durable state and prepares scratch
//! storage; [`RunController::run`] drives discovery, the download producer
//! and the batch loop to completion, then tears everything down. Durable
//! files are only written from the task that calls `run`.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::aggregate::BatchAggregator;
use crate::pipeline::executor::BatchExecutor;
use crate::pipeline::producer::{DownloadProducer, FetchFailure, ProducerReport};
use crate::pipeline::queue::prefetch_queue;
use crate::pipeline::sink::ResultSink;
use crate::source::{discover, Fetcher, ItemLister};
use crate::stats::{RunStats, RunSummary};
use crate::store::{self, AttemptLedger, CheckpointStore, OutputLog};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How long to wait for the producer after the last batch.
const PRODUCER_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct RunController {
    config: PipelineConfig,
    sink: ResultSink,
    scratch_root: TempDir,
    previously_checkpointed: usize,
}

impl RunController {
    /// Create directories, load the checkpoint, attempt ledger and output
    /// log, repair orphaned outputs and create the run's scratch root.
    pub fn open(config: PipelineConfig) -> Result<Self, PipelineError> {
        std::fs::create_dir_all(&config.output_dir).map_err(|source| {
            PipelineError::Directory {
                path: config.output_dir.clone(),
                source,
            }
        })?;

        let mut checkpoints = CheckpointStore::open(config.checkpoint_path())?;
        let output = OutputLog::open(config.dataset_path())?;
        let attempts = AttemptLedger::open(config.attempts_path())?;

        let recovered = store::reconcile(&output, &mut checkpoints)?;
        if recovered > 0 {
            warn!(
                "Checkpointed {} items found in the output log but not in the checkpoint",
                recovered
            );
        }
        let previously_checkpointed = checkpoints.len();

        let scratch_parent = config
            .scratch_root
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let scratch_err = |source| PipelineError::Directory {
            path: scratch_parent.clone(),
            source,
        };
        std::fs::create_dir_all(&scratch_parent).map_err(scratch_err)?;
        let scratch_root = tempfile::Builder::new()
            .prefix("arxiv_processing_")
            .tempdir_in(&scratch_parent)
            .map_err(scratch_err)?;
        debug!("Scratch root {}", scratch_root.path().display());

        let sink = ResultSink::new(
            checkpoints,
            output,
            attempts,
            config.max_batch_attempts,
            config.progress_callback.clone(),
        );

        Ok(Self {
            config,
            sink,
            scratch_root,
            previously_checkpointed,
        })
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        self.sink.checkpoints()
    }

    pub fn scratch_root(&self) -> &Path {
        self.scratch_root.path()
    }

    /// Process every pending item of the configured period.
    ///
    /// # Errors
    /// Only fatal conditions: listing failed, durable state could not be
    /// written, or the producer task panicked. Item failures are recorded
    /// and counted in the summary.
    pub async fn run(
        mut self,
        lister: &dyn ItemLister,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<RunSummary, PipelineError> {
        let started = Instant::now();
        let period = self.config.period;
        info!("Processing arXiv papers for {}", period);

        let locators = lister.list(&period).await?;
        let discovery = discover(&locators, self.sink.checkpoints());

        let mut stats = RunStats {
            listed_files: discovery.listed_files,
            unique_items: discovery.unique_items,
            pending: discovery.pending.len(),
            previously_checkpointed: self.previously_checkpointed,
            ..RunStats::default()
        };
        if let Some(cb) = &self.config.progress_callback {
            cb.on_run_start(stats.pending, stats.previously_checkpointed);
        }

        if discovery.pending.is_empty() {
            info!("No new items to process");
            return self.finish(stats, started);
        }

        info!(
            "Batch size {}, prefetch queue capacity {}, batch deadline {:?}",
            self.config.batch_size,
            self.config.queue_capacity(),
            self.config.batch_deadline(self.config.batch_size)
        );

        let (publisher, consumer) = prefetch_queue(self.config.queue_capacity());
        let (failures_tx, mut failures) = mpsc::unbounded_channel();
        let producer = DownloadProducer::new(
            fetcher,
            self.scratch_root.path().to_path_buf(),
            self.config.fetch_timeout,
        );
        let mut handle = tokio::spawn(producer.run(discovery.pending, publisher, failures_tx));

        let mut aggregator =
            BatchAggregator::new(consumer, self.config.batch_size, self.config.idle_timeout);
        let mut executor = BatchExecutor::new(&self.config);

        if let Err(e) = self
            .batch_loop(&mut aggregator, &mut executor, &handle, &mut failures, &mut stats)
            .await
        {
            error!("Stopping run: {}", e);
            handle.abort();
            drop(aggregator);
            let _ = handle.await;
            return Err(e);
        }
        drop(aggregator);

        let producer_error = match tokio::time::timeout(PRODUCER_JOIN_TIMEOUT, &mut handle).await {
            Ok(Ok(report)) => {
                debug!("Producer report: {:?}", report);
                None
            }
            Ok(Err(e)) if e.is_panic() => Some(PipelineError::ProducerFailed(e.to_string())),
            Ok(Err(e)) => {
                warn!("Producer task did not complete: {}", e);
                None
            }
            Err(_) => {
                warn!(
                    "Producer still running after {:?}; aborting it",
                    PRODUCER_JOIN_TIMEOUT
                );
                handle.abort();
                None
            }
        };

        self.drain_fetch_failures(&mut failures, &mut stats)?;
        if let Some(e) = producer_error {
            error!("{}", e);
            self.teardown();
            return Err(e);
        }
        self.finish(stats, started)
    }

    async fn batch_loop(
        &mut self,
        aggregator: &mut BatchAggregator,
        executor: &mut BatchExecutor,
        producer: &JoinHandle<ProducerReport>,
        failures: &mut UnboundedReceiver<FetchFailure>,
        stats: &mut RunStats,
    ) -> Result<(), PipelineError> {
        let mut batch_num = 0;
        loop {
            let batch = aggregator.gather(producer).await;
            self.drain_fetch_failures(failures, stats)?;
            let is_final = batch.is_final();

            if !batch.is_empty() {
                batch_num += 1;
                stats.batches += 1;
                info!("Processing batch {} with {} items", batch_num, batch.len());
                if let Some(cb) = &self.config.progress_callback {
                    cb.on_batch_start(batch_num, batch.len());
                }

                let outcome = executor.execute(&batch.items).await;
                if outcome.timed_out {
                    stats.timed_out_batches += 1;
                }
                let committed = self.sink.commit(batch.items, outcome.results, stats)?;
                self.drain_fetch_failures(failures, stats)?;

                info!(
                    "Batch {}: {} converted, {} failed, {} deferred ({} of {} items done)",
                    batch_num,
                    committed.converted,
                    committed.failed,
                    committed.deferred,
                    stats.attempted(),
                    stats.pending
                );
                if let Some(cb) = &self.config.progress_callback {
                    cb.on_batch_complete(batch_num, stats);
                }
            }

            if is_final {
                return Ok(());
            }
        }
    }

    fn drain_fetch_failures(
        &mut self,
        failures: &mut UnboundedReceiver<FetchFailure>,
        stats: &mut RunStats,
    ) -> Result<(), PipelineError> {
        while let Ok(failure) = failures.try_recv() {
            self.sink.record_fetch_failure(&failure.id)?;
            stats.fetch_failures += 1;
            if let Some(cb) = &self.config.progress_callback {
                cb.on_fetch_failed(&failure.id, &failure.error.to_string());
            }
        }
        Ok(())
    }

    fn finish(mut self, stats: RunStats, started: Instant) -> Result<RunSummary, PipelineError> {
        self.sink.sync()?;
        let summary = RunSummary {
            period: self.config.period.to_string(),
            dataset_path: self.config.dataset_path(),
            checkpoint_path: self.config.checkpoint_path(),
            checkpointed: self.sink.checkpoints().len(),
            stats,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            "Processing complete. {} converted, {} failed, {} fetch failures; checkpoint holds {} items",
            summary.stats.converted,
            summary.stats.failed,
            summary.stats.fetch_failures,
            summary.checkpointed
        );
        if let Some(cb) = &self.config.progress_callback {
            cb.on_run_complete(&summary.stats);
        }
        self.teardown();
        Ok(summary)
    }

    fn teardown(self) {
        let mut sink = self.sink;
        if let Err(e) = sink.sync() {
            warn!("Final sync failed: {}", e);
        }
        let path = self.scratch_root.path().to_path_buf();
        if let Err(e) = self.scratch_root.close() {
            warn!("Failed to remove scratch root {}: {}", path.display(), e);
        }
    }
}
