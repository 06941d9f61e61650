//! Durable, append-only run state.
//!
//! | File | Contents | Written when |
//! |------|----------|--------------|
//! | `checkpoints/arxiv_YYMM.checkpoint` | one resolved identifier per line | any terminal outcome |
//! | `jsonls/arxiv_YYMM.jsonl` | one `{arxiv_id, markdown}` record per line | success only |
//! | `checkpoints/arxiv_YYMM.attempts` | one identifier per batch-level failure | before the budget is spent |
//!
//! All three are only ever appended to, and only by the controller task.

mod attempts;
mod checkpoint;
mod output_log;

pub use attempts::AttemptLedger;
pub use checkpoint::CheckpointStore;
pub use output_log::OutputLog;

use crate::error::PipelineError;
use std::fs::OpenOptions;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Create the parent directory of `path` if needed.
pub(crate) fn ensure_parent(path: &Path) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| PipelineError::Directory {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }
    Ok(())
}

/// Newline-terminate a line left unfinished by a crash mid-append.
///
/// Without this the next append would be glued onto the torn text and be
/// unreadable on the following open. Returns whether a newline was written.
pub(crate) fn terminate_last_line(path: &Path) -> io::Result<bool> {
    let mut file = match OpenOptions::new().read(true).append(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(false);
    }
    file.write_all(b"\n")?;
    file.sync_data()?;
    Ok(true)
}

/// Identifiers recorded in the output log but missing from the checkpoint.
///
/// Happens when a run dies between the two appends for a success. They are
/// checkpointed at startup so the item is neither reconverted nor duplicated.
pub fn reconcile(
    output: &OutputLog,
    checkpoints: &mut CheckpointStore,
) -> Result<usize, PipelineError> {
    let mut recovered = 0;
    for id in output.ids() {
        if checkpoints.insert(id)? {
            recovered += 1;
        }
    }
    Ok(recovered)
}
