//! JSON Lines spool for batches the store rejected.
//!
//! Each dropped record is appended as one JSON object per line to
//! `failed_{date}.jsonl`. A truncated final line only loses that record.
//! The writer replays the spool after the next successful flush and then
//! clears it.

use crate::error::PersistenceResult;
use chrono::Utc;
use sigrelay_core::ClassifiedMessage;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const FILE_PREFIX: &str = "failed_";
const FILE_SUFFIX: &str = ".jsonl";

/// File currently open for appends.
struct ActiveFile {
    writer: BufWriter<File>,
    date: String,
    records_written: usize,
}

/// Append-only spool of failed records, rotated daily.
pub struct FailedBatchSpool {
    dir: PathBuf,
    active: Option<ActiveFile>,
    pending: bool,
}

impl FailedBatchSpool {
    /// Open the spool directory, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> PersistenceResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let pending = !spool_files(&dir)?.is_empty();
        if pending {
            info!(dir = %dir.display(), "Spool holds records from a previous run");
        }
        Ok(Self {
            dir,
            active: None,
            pending,
        })
    }

    /// True when spooled records await replay.
    pub fn has_pending(&self) -> bool {
        self.pending
    }

    /// Append records to today's file.
    pub fn append(&mut self, records: &[ClassifiedMessage]) -> PersistenceResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let today = Utc::now().format("%Y-%m-%d").to_string();
        if self.active.as_ref().is_some_and(|a| a.date != today) {
            self.close_active();
        }
        if self.active.is_none() {
            self.open_active(&today)?;
        }

        if let Some(active) = self.active.as_mut() {
            for record in records {
                let json = serde_json::to_string(record)?;
                writeln!(active.writer, "{}", json)?;
            }
            active.writer.flush()?;
            active.records_written += records.len();
        }

        self.pending = true;
        debug!(date = %today, records = records.len(), "Spooled failed records");
        Ok(records.len())
    }

    /// Read every spooled record, oldest file first.
    ///
    /// Lines that fail to decode are skipped with a warning.
    pub fn load(&mut self) -> PersistenceResult<Vec<ClassifiedMessage>> {
        self.close_active();

        let mut records = Vec::new();
        for path in spool_files(&self.dir)? {
            let reader = BufReader::new(File::open(&path)?);
            for (idx, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<ClassifiedMessage>(&line) {
                    Ok(record) => records.push(record),
                    Err(e) => warn!(
                        file = %path.display(),
                        line = idx + 1,
                        error = %e,
                        "Skipping undecodable spool line"
                    ),
                }
            }
        }
        Ok(records)
    }

    /// Remove every spool file.
    pub fn clear(&mut self) -> PersistenceResult<()> {
        self.close_active();
        for path in spool_files(&self.dir)? {
            fs::remove_file(&path)?;
        }
        self.pending = false;
        Ok(())
    }

    fn open_active(&mut self, date: &str) -> PersistenceResult<()> {
        let path = self.dir.join(format!("{FILE_PREFIX}{date}{FILE_SUFFIX}"));
        info!(path = %path.display(), "Opening spool file (append mode)");

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        self.active = Some(ActiveFile {
            writer: BufWriter::new(file),
            date: date.to_string(),
            records_written: 0,
        });
        Ok(())
    }

    fn close_active(&mut self) {
        if let Some(mut active) = self.active.take() {
            if let Err(e) = active.writer.flush() {
                warn!(?e, "Failed to flush spool file on close");
            }
            debug!(
                date = %active.date,
                records = active.records_written,
                "Closed spool file"
            );
        }
    }
}

impl Drop for FailedBatchSpool {
    fn drop(&mut self) {
        self.close_active();
    }
}

/// Spool files in `dir`, sorted by name (and therefore by date).
fn spool_files(dir: &Path) -> PersistenceResult<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(FILE_PREFIX) && n.ends_with(FILE_SUFFIX))
        })
        .collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigrelay_core::MarketNote;
    use tempfile::TempDir;

    fn note(text: &str) -> ClassifiedMessage {
        ClassifiedMessage::Market(MarketNote::new(Some("desk"), text, Utc::now()))
    }

    #[test]
    fn test_append_and_load() {
        let dir = TempDir::new().unwrap();
        let mut spool = FailedBatchSpool::new(dir.path()).unwrap();
        assert!(!spool.has_pending());

        spool.append(&[note("a"), note("b")]).unwrap();
        spool.append(&[note("c")]).unwrap();
        assert!(spool.has_pending());

        let loaded = spool.load().unwrap();
        let keys: Vec<_> = loaded.iter().map(|r| r.dedup_key()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_pending_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mut spool = FailedBatchSpool::new(dir.path()).unwrap();
            spool.append(&[note("a")]).unwrap();
        }
        let mut reopened = FailedBatchSpool::new(dir.path()).unwrap();
        assert!(reopened.has_pending());
        assert_eq!(reopened.load().unwrap().len(), 1);
    }

    #[test]
    fn test_clear_removes_files() {
        let dir = TempDir::new().unwrap();
        let mut spool = FailedBatchSpool::new(dir.path()).unwrap();
        spool.append(&[note("a")]).unwrap();
        spool.clear().unwrap();

        assert!(!spool.has_pending());
        assert!(spool.load().unwrap().is_empty());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_corrupt_line_skipped() {
        let dir = TempDir::new().unwrap();
        let mut spool = FailedBatchSpool::new(dir.path()).unwrap();
        spool.append(&[note("a")]).unwrap();
        spool.close_active();

        let path = spool_files(dir.path()).unwrap().remove(0);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{\"type\":\"market\",\"sen").unwrap();

        assert_eq!(spool.load().unwrap().len(), 1);
    }

    #[test]
    fn test_empty_append_creates_nothing() {
        let dir = TempDir::new().unwrap();
        let mut spool = FailedBatchSpool::new(dir.path()).unwrap();
        assert_eq!(spool.append(&[]).unwrap(), 0);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
