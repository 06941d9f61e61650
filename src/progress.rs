//! Progress-callback trait for run and batch events.
//!
//! Inject an [`Arc<dyn RunProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the controller resolves items. The CLI renders them as a
//! progress bar; library users can forward them anywhere.
//!
//! All callbacks are invoked from the controller task, one at a time.

use crate::item::ConversionResult;
use crate::stats::RunStats;
use std::sync::Arc;

/// Called by the controller as a run progresses.
///
/// All methods have default no-op implementations so callers only
/// override what they care about.
pub trait RunProgressCallback: Send + Sync {
    /// Called once after discovery.
    ///
    /// # Arguments
    /// * `pending`       — items that will be attempted in this run
    /// * `already_done`  — identifiers already present in the checkpoint
    fn on_run_start(&self, pending: usize, already_done: usize) {
        let _ = (pending, already_done);
    }

    /// Called when the download producer gives up on an item.
    fn on_fetch_failed(&self, id: &str, error: &str) {
        let _ = (id, error);
    }

    /// Called just before a batch is handed to a fresh worker.
    fn on_batch_start(&self, batch_num: usize, size: usize) {
        let _ = (batch_num, size);
    }

    /// Called once per item of a committed batch.
    fn on_item_resolved(&self, result: &ConversionResult) {
        let _ = result;
    }

    /// Called after a batch's results are durable.
    fn on_batch_complete(&self, batch_num: usize, stats: &RunStats) {
        let _ = (batch_num, stats);
    }

    /// Called once when the run finishes without a fatal error.
    fn on_run_complete(&self, stats: &RunStats) {
        let _ = stats;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl RunProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn RunProgressCallback>;
