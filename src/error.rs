//! Error types for the pdf2md-batch library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PipelineError`] — **Fatal**: the run itself cannot continue (bad
//!   configuration, the bucket listing failed, the checkpoint or output log
//!   could not be written, the download producer died). Returned as
//!   `Err(PipelineError)` from [`crate::controller::RunController`].
//!
//! * [`ItemError`] — **Non-fatal**: one item (or every item of one batch)
//!   reached a failure outcome. Carried inside
//!   [`crate::item::ConversionResult::Failure`], recorded in the checkpoint
//!   and reported, while the run moves on to the next batch.
//!
//! The remaining enums belong to the collaborators at the edges of the
//! pipeline: [`ListError`] and [`FetchError`] for the item source,
//! [`ConvertError`] for the conversion tool, [`WorkerError`] for the
//! isolated worker process.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pdf2md-batch library.
///
/// Item-level failures use [`ItemError`] and never surface here.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Source errors ─────────────────────────────────────────────────────
    /// The item lister could not enumerate candidates.
    #[error("Failed to list items: {0}")]
    Listing(#[from] ListError),

    // ── Durable state errors ──────────────────────────────────────────────
    /// Could not create the output, checkpoint or scratch directories.
    #[error("Failed to prepare directory '{path}': {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading or appending to the checkpoint file failed.
    #[error("Checkpoint file '{path}' is unusable: {source}")]
    Checkpoint {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading or appending to the output log failed.
    #[error("Failed to write output log '{path}': {source}")]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A record could not be serialised for the output log.
    #[error("Failed to serialise output record for '{id}': {source}")]
    Serialise {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    // ── Pipeline machinery ────────────────────────────────────────────────
    /// The download producer task panicked or was cancelled.
    #[error("Download producer failed: {0}")]
    ProducerFailed(String),
}

/// A non-fatal outcome for a single item.
///
/// The first two variants are local to one item; the others are raised for
/// every item of a batch at once (see [`ItemError::is_batch_level`]).
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemError {
    /// The payload the worker was handed does not exist on disk.
    #[error("PDF path missing or invalid: {path}")]
    PayloadMissing { path: PathBuf },

    /// The conversion capability failed on this item.
    #[error("Conversion failed: {detail}")]
    Conversion { detail: String },

    /// The worker could not initialise the converter for its batch.
    #[error("Batch initialisation failed: {detail}")]
    BatchInit { detail: String },

    /// The worker did not answer before the batch deadline.
    #[error("Batch timeout after {secs}s")]
    BatchTimeout { secs: u64 },

    /// Spawning or talking to the worker process failed.
    #[error("Batch process management error: {detail}")]
    ProcessManagement { detail: String },

    /// The worker answered with something that is not a batch response.
    #[error("Unexpected result from batch worker: {detail}")]
    MalformedResult { detail: String },
}

impl ItemError {
    /// True for failures detected for a whole batch rather than one item.
    ///
    /// These go through the attempt budget in the result sink instead of
    /// being checkpointed unconditionally.
    pub fn is_batch_level(&self) -> bool {
        matches!(
            self,
            ItemError::BatchInit { .. }
                | ItemError::BatchTimeout { .. }
                | ItemError::ProcessManagement { .. }
                | ItemError::MalformedResult { .. }
        )
    }
}

/// Failure to enumerate candidate items.
#[derive(Debug, Error)]
pub enum ListError {
    #[error("listing request to '{url}' failed: {reason}")]
    Request { url: String, reason: String },

    #[error("listing request to '{url}' returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("cannot read source directory '{path}': {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure to fetch one item. Permanent for the run.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("download of '{locator}' failed: {reason}")]
    Download { locator: String, reason: String },

    #[error("download of '{locator}' returned HTTP {status}")]
    Status { locator: String, status: u16 },

    #[error("fetch timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("unsupported locator '{0}'")]
    UnsupportedLocator(String),

    #[error("scratch storage error: {0}")]
    Scratch(#[from] std::io::Error),
}

/// Failure reported by a [`crate::worker::DocumentConverter`].
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("conversion tool '{program}' not found")]
    ToolNotFound { program: String },

    #[error("failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with {status}: {stderr}")]
    ToolFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("failed to persist asset '{path}': {reason}")]
    Asset { path: PathBuf, reason: String },
}

/// Fatal error inside the worker process itself (not an item failure).
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to read batch request: {0}")]
    ReadRequest(#[source] std::io::Error),

    #[error("invalid batch request: {0}")]
    InvalidRequest(#[source] serde_json::Error),

    #[error("failed to write batch response: {0}")]
    WriteResponse(#[source] std::io::Error),

    #[error("failed to encode batch response: {0}")]
    EncodeResponse(#[source] serde_json::Error),
}
