//! Result sink: the only place durable run state changes.
//!
//! | Outcome | Output log | Checkpoint |
//! |---------|------------|------------|
//! | `Success` | appended first | then added |
//! | item-level `Failure` | – | added |
//! | batch-level `Failure` | – | added once the attempt budget is spent |
//! | fetch failure | – | added |
//!
//! Output goes before the checkpoint so a crash between the two leaves an
//! orphaned output record, which [`crate::store::reconcile`] repairs at the
//! next start, rather than a checkpointed item with no output.

use crate::error::PipelineError;
use crate::item::{ConversionResult, FetchedItem, OutputRecord};
use crate::progress::ProgressCallback;
use crate::stats::RunStats;
use crate::store::{AttemptLedger, CheckpointStore, OutputLog};
use tracing::{debug, info, warn};

/// How one committed batch changed durable state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub converted: usize,
    pub failed: usize,
    pub deferred: usize,
    /// Identifiers added to the checkpoint by this commit.
    pub newly_checkpointed: usize,
}

pub struct ResultSink {
    checkpoints: CheckpointStore,
    output: OutputLog,
    attempts: AttemptLedger,
    max_batch_attempts: u32,
    progress: Option<ProgressCallback>,
}

impl ResultSink {
    pub fn new(
        checkpoints: CheckpointStore,
        output: OutputLog,
        attempts: AttemptLedger,
        max_batch_attempts: u32,
        progress: Option<ProgressCallback>,
    ) -> Self {
        Self {
            checkpoints,
            output,
            attempts,
            max_batch_attempts: max_batch_attempts.max(1),
            progress,
        }
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    pub fn output(&self) -> &OutputLog {
        &self.output
    }

    /// Resolve an item the producer could not download.
    pub fn record_fetch_failure(&mut self, id: &str) -> Result<bool, PipelineError> {
        self.checkpoints.insert(id)
    }

    /// Commit a batch's results, make them durable, then release the
    /// batch's scratch directories.
    pub fn commit(
        &mut self,
        items: Vec<FetchedItem>,
        results: Vec<ConversionResult>,
        stats: &mut RunStats,
    ) -> Result<CommitSummary, PipelineError> {
        let mut summary = CommitSummary::default();

        for result in &results {
            match result {
                ConversionResult::Success { id, markdown } => {
                    self.output.append(&OutputRecord {
                        arxiv_id: id.clone(),
                        markdown: markdown.clone(),
                    })?;
                    if self.checkpoints.insert(id)? {
                        summary.newly_checkpointed += 1;
                    }
                    summary.converted += 1;
                    debug!("Committed {} ({} bytes)", id, markdown.len());
                }
                ConversionResult::Failure { id, error } if error.is_batch_level() => {
                    let attempt = self.attempts.attempts(id) + 1;
                    if attempt >= self.max_batch_attempts {
                        warn!("Giving up on {} after {} attempt(s): {}", id, attempt, error);
                        if self.checkpoints.insert(id)? {
                            summary.newly_checkpointed += 1;
                        }
                        summary.failed += 1;
                    } else {
                        self.attempts.record(id)?;
                        info!(
                            "{} failed ({}); will retry next run (attempt {}/{})",
                            id, error, attempt, self.max_batch_attempts
                        );
                        summary.deferred += 1;
                    }
                }
                ConversionResult::Failure { id, error } => {
                    warn!("Error processing {}: {}", id, error);
                    if self.checkpoints.insert(id)? {
                        summary.newly_checkpointed += 1;
                    }
                    summary.failed += 1;
                }
            }
            if let Some(cb) = &self.progress {
                cb.on_item_resolved(result);
            }
        }

        self.sync()?;
        for item in items {
            item.release();
        }

        stats.converted += summary.converted;
        stats.failed += summary.failed;
        stats.deferred += summary.deferred;
        Ok(summary)
    }

    /// Flush every durable file.
    pub fn sync(&mut self) -> Result<(), PipelineError> {
        self.output.sync()?;
        self.checkpoints.sync()?;
        self.attempts.sync()
    }
}
