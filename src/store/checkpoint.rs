use super::{ensure_parent, terminate_last_line};
use crate::error::PipelineError;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Set of resolved identifiers backed by a newline-delimited file.
///
/// An identifier is written at most once per store; repeated inserts only
/// touch the in-memory set.
pub struct CheckpointStore {
    path: PathBuf,
    ids: HashSet<String>,
    file: File,
}

impl CheckpointStore {
    /// Load every identifier in `path` and open it for appending.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref().to_path_buf();
        ensure_parent(&path)?;
        let err = |source| PipelineError::Checkpoint {
            path: path.clone(),
            source,
        };

        if terminate_last_line(&path).map_err(err)? {
            warn!("Checkpoint {} ended mid-line; closed the line", path.display());
        }

        let mut ids = HashSet::new();
        if path.exists() {
            let reader = BufReader::new(File::open(&path).map_err(err)?);
            for line in reader.lines() {
                let line = line.map_err(err)?;
                let id = line.trim();
                if !id.is_empty() {
                    ids.insert(id.to_string());
                }
            }
            info!("Resuming from checkpoint with {} processed items", ids.len());
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

    /// Record `id` as resolved. Returns `false` if it already was.
    pub fn insert(&mut self, id: &str) -> Result<bool, PipelineError> {
        if self.ids.contains(id) {
            return Ok(false);
        }
        writeln!(self.file, "{id}")
            .and_then(|_| self.file.flush())
            .map_err(|source| PipelineError::Checkpoint {
                path: self.path.clone(),
                source,
            })?;
        self.ids.insert(id.to_string());
        Ok(true)
    }

    /// Flush appended identifiers to stable storage.
    pub fn sync(&mut self) -> Result<(), PipelineError> {
        self.file
            .sync_data()
            .map_err(|source| PipelineError::Checkpoint {
                path: self.path.clone(),
                source,
            })
    }
}
