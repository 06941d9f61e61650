//! Counters surfaced while a run progresses and in its final summary.

use serde::{Deserialize, Serialize};

/// Counts for one run. Durable state is authoritative; these only
/// describe what this process did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// PDF objects returned by the lister.
    pub listed_files: usize,
    /// Unique items after version collapsing.
    pub unique_items: usize,
    /// Items not yet checkpointed, i.e. attempted by this run.
    pub pending: usize,
    /// Checkpoint size when the run started.
    pub previously_checkpointed: usize,
    /// Items the producer could not download.
    pub fetch_failures: usize,
    /// Items appended to the output log.
    pub converted: usize,
    /// Items resolved as failures (checkpointed without output).
    pub failed: usize,
    /// Items that hit a batch-level failure but still have attempts left.
    pub deferred: usize,
    /// Batches handed to a worker.
    pub batches: usize,
    /// Batches that hit their deadline.
    pub timed_out_batches: usize,
}

impl RunStats {
    /// Items this run reached a terminal or deferred outcome for.
    pub fn attempted(&self) -> usize {
        self.fetch_failures + self.converted + self.failed + self.deferred
    }
}

/// Final report of [`crate::controller::RunController::run`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub period: String,
    pub dataset_path: std::path::PathBuf,
    pub checkpoint_path: std::path::PathBuf,
    /// Checkpoint size after the run.
    pub checkpointed: usize,
    pub stats: RunStats,
    pub duration_ms: u64,
}
