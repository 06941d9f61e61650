use super::{ensure_parent, terminate_last_line};
use crate::error::PipelineError;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Counts batch-level failures per identifier across runs.
///
/// Each failure appends the identifier once; the count is the number of
/// lines naming it.
pub struct AttemptLedger {
    path: PathBuf,
    counts: HashMap<String, u32>,
    file: File,
}

impl AttemptLedger {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref().to_path_buf();
        ensure_parent(&path)?;
        let err = |source| PipelineError::Checkpoint {
            path: path.clone(),
            source,
        };

        if terminate_last_line(&path).map_err(err)? {
            warn!("Attempt ledger {} ended mid-line; closed the line", path.display());
        }

        let mut counts = HashMap::new();
        if path.exists() {
            let reader = BufReader::new(File::open(&path).map_err(err)?);
            for line in reader.lines() {
                let line = line.map_err(err)?;
                let id = line.trim();
                if !id.is_empty() {
                    *counts.entry(id.to_string()).or_insert(0) += 1;
                }
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(err)?;

        Ok(Self { path, counts, file })
    }

    pub fn attempts(&self, id: &str) -> u32 {
        self.counts.get(id).copied().unwrap_or(0)
    }

    /// Record one more failed attempt and return the new total.
    pub fn record(&mut self, id: &str) -> Result<u32, PipelineError> {
        writeln!(self.file, "{id}")
            .and_then(|_| self.file.flush())
            .map_err(|source| PipelineError::Checkpoint {
                path: self.path.clone(),
                source,
            })?;
        let count = self.counts.entry(id.to_string()).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    pub fn sync(&mut self) -> Result<(), PipelineError> {
        self.file
            .sync_data()
            .map_err(|source| PipelineError::Checkpoint {
                path: self.path.clone(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_accumulate_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.attempts");
        {
            let mut ledger = AttemptLedger::open(&path).unwrap();
            assert_eq!(ledger.record("a").unwrap(), 1);
            assert_eq!(ledger.record("b").unwrap(), 1);
        }
        let mut ledger = AttemptLedger::open(&path).unwrap();
        assert_eq!(ledger.attempts("a"), 1);
        assert_eq!(ledger.record("a").unwrap(), 2);
        assert_eq!(ledger.attempts("missing"), 0);
    }

    #[test]
    fn record_after_torn_line_is_counted_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.attempts");
        std::fs::write(&path, "a\n2101.0000").unwrap();

        let mut ledger = AttemptLedger::open(&path).unwrap();
        assert_eq!(ledger.record("a").unwrap(), 2);
        drop(ledger);

        let ledger = AttemptLedger::open(&path).unwrap();
        assert_eq!(ledger.attempts("a"), 2);
        assert_eq!(ledger.attempts("2101.0000"), 1);
    }
}
