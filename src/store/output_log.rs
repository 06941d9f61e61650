use super::{ensure_parent, terminate_last_line};
use crate::error::PipelineError;
use crate::item::OutputRecord;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Append-only JSONL log of successful conversions.
///
/// Appending an identifier that is already in the log is a no-op, so a
/// replayed batch can never duplicate a record.
pub struct OutputLog {
    path: PathBuf,
    ids: HashSet<String>,
    file: File,
}

/// Only the identifier is needed to index an existing log.
#[derive(Deserialize)]
struct RecordId {
    arxiv_id: String,
}

impl OutputLog {
    /// Create the log if missing and index the identifiers it holds.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref().to_path_buf();
        ensure_parent(&path)?;
        let err = |source| PipelineError::OutputWrite {
            path: path.clone(),
            source,
        };

        if terminate_last_line(&path).map_err(err)? {
            warn!("Output log {} ended mid-record; closed the line", path.display());
        }

        let mut ids = HashSet::new();
        if path.exists() {
            let reader = BufReader::new(File::open(&path).map_err(err)?);
            for (n, line) in reader.lines().enumerate() {
                let line = line.map_err(err)?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<RecordId>(&line) {
                    Ok(r) => {
                        ids.insert(r.arxiv_id);
                    }
                    Err(e) => warn!(
                        "Skipping unreadable record on line {} of {}: {}",
                        n + 1,
                        path.display(),
                        e
                    ),
                }
            }
            debug!("Output log {} holds {} records", path.display(), ids.len());
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(err)?;

        Ok(Self { path, ids, file })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    /// Append one record. Returns `false` if the identifier was already logged.
    pub fn append(&mut self, record: &OutputRecord) -> Result<bool, PipelineError> {
        if self.ids.contains(&record.arxiv_id) {
            warn!("{} already in output log; not appending again", record.arxiv_id);
            return Ok(false);
        }
        let mut line = serde_json::to_string(record).map_err(|source| PipelineError::Serialise {
            id: record.arxiv_id.clone(),
            source,
        })?;
        line.push('\n');
        self.file
            .write_all(line.as_bytes())
            .and_then(|_| self.file.flush())
            .map_err(|source| PipelineError::OutputWrite {
                path: self.path.clone(),
                source,
            })?;
        self.ids.insert(record.arxiv_id.clone());
        Ok(true)
    }

    /// Flush appended records to stable storage.
    pub fn sync(&mut self) -> Result<(), PipelineError> {
        self.file
            .sync_data()
            .map_err(|source| PipelineError::OutputWrite {
                path: self.path.clone(),
                source,
            })
    }
}
