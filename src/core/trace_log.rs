//! Append-only trace log with file-based persistence.
//!
//! Records are stored as newline-delimited JSON (JSONL). Each record is
//! produced by the safe serializer, so a flush never aborts on a bad entry.
//! Appends take an exclusive file lock so independent runs can share a log.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::domain::{TraceBuffer, TraceEntry, TraceKind};

use super::sanitize::{encode_entry, Encoded, RECORD_SEPARATOR};

/// File-based trace log using JSONL format
#[derive(Debug, Clone)]
pub struct TraceLog {
    path: PathBuf,
}

/// What a flush wrote
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendReport {
    /// Records written, one per entry
    pub written: usize,

    /// Records that needed the cleaning fallback
    pub cleaned: usize,

    /// Records replaced by the sentinel
    pub sentinels: usize,
}

/// A record read back from the log
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum LoggedRecord {
    Entry {
        timestamp: DateTime<Utc>,
        stage: String,
        #[serde(rename = "type")]
        kind: TraceKind,
        content: serde_json::Value,
    },
    Unprocessable {
        error: String,
        raw: String,
    },
}

impl LoggedRecord {
    /// Stage name, if the record is a regular entry
    pub fn stage(&self) -> Option<&str> {
        match self {
            LoggedRecord::Entry { stage, .. } => Some(stage),
            LoggedRecord::Unprocessable { .. } => None,
        }
    }

    pub fn kind(&self) -> Option<TraceKind> {
        match self {
            LoggedRecord::Entry { kind, .. } => Some(*kind),
            LoggedRecord::Unprocessable { .. } => None,
        }
    }
}

impl TraceLog {
    /// Use a log at the given path (created on first append)
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Log at the configured location ($STAGEWRIGHT_LOG_FILE or the config file)
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(crate::config::log_file()?))
    }

    /// Get the path to the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append entries, one record each, under an exclusive lock
    pub fn append(&self, entries: &[TraceEntry]) -> Result<AppendReport> {
        let mut report = AppendReport::default();
        if entries.is_empty() {
            return Ok(report);
        }

        let mut batch = String::new();
        for entry in entries {
            let encoded = encode_entry(entry);
            match encoded {
                Encoded::Direct(_) => {}
                Encoded::Cleaned(_) => report.cleaned += 1,
                Encoded::Sentinel(_) => report.sentinels += 1,
            }
            batch.push_str(encoded.as_str());
            batch.push(RECORD_SEPARATOR);
            report.written += 1;
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open trace log: {}", self.path.display()))?;

        file.lock_exclusive()
            .context("Failed to acquire file lock on trace log")?;

        // Lock is released when file is dropped
        file.write_all(batch.as_bytes())
            .context("Failed to write trace records")?;
        file.flush().context("Failed to flush trace records")?;

        Ok(report)
    }

    /// Replay all records in order. Lines that do not parse are skipped.
    pub fn replay(&self) -> Result<Vec<LoggedRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open trace log: {}", self.path.display()))?;

        let mut records = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line
                .with_context(|| format!("Failed to read trace log: {}", self.path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LoggedRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    path = %self.path.display(),
                    line = index + 1,
                    error = %e,
                    "Skipping unreadable trace record"
                ),
            }
        }

        Ok(records)
    }

    /// Records belonging to one stage
    pub fn records_for_stage(&self, stage: &str) -> Result<Vec<LoggedRecord>> {
        let records = self.replay()?;
        Ok(records
            .into_iter()
            .filter(|r| r.stage() == Some(stage))
            .collect())
    }
}

/// Aggregate trace log of one run.
///
/// Collects drained stage buffers and writes them to the [`TraceLog`] exactly
/// once: on [`TraceJournal::finish`], or on drop if `finish` was never reached.
pub struct TraceJournal<'a> {
    log: &'a TraceLog,
    entries: Vec<TraceEntry>,
    flushed: bool,
}

impl<'a> TraceJournal<'a> {
    pub fn new(log: &'a TraceLog) -> Self {
        Self {
            log,
            entries: Vec::new(),
            flushed: false,
        }
    }

    /// Move a stage's entries into the aggregate log
    pub fn absorb(&mut self, buffer: TraceBuffer) {
        debug!(stage = buffer.stage(), entries = buffer.len(), "Draining stage trace");
        self.entries.extend(buffer.into_entries());
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    /// Flush and close the journal
    pub fn finish(mut self) -> Option<AppendReport> {
        self.flush()
    }

    fn flush(&mut self) -> Option<AppendReport> {
        if self.flushed {
            return None;
        }
        self.flushed = true;

        let entries = std::mem::take(&mut self.entries);
        match self.log.append(&entries) {
            Ok(report) => {
                info!(
                    path = %self.log.path().display(),
                    written = report.written,
                    cleaned = report.cleaned,
                    sentinels = report.sentinels,
                    "Trace log flushed"
                );
                Some(report)
            }
            Err(e) => {
                error!(
                    path = %self.log.path().display(),
                    lost = entries.len(),
                    error = %format!("{:#}", e),
                    "Failed to persist trace log"
                );
                None
            }
        }
    }
}

impl Drop for TraceJournal<'_> {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Opaque, TraceValue};
    use serde_json::json;
    use tempfile::TempDir;

    fn temp_log() -> (TraceLog, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let log = TraceLog::new(temp_dir.path().join("logs").join("trace.jsonl"));
        (log, temp_dir)
    }

    #[test]
    fn test_append_and_replay() {
        let (log, _temp) = temp_log();

        let entries = vec![
            TraceEntry::new("writer", TraceKind::Prompt, "write requirements"),
            TraceEntry::new(
                "writer",
                TraceKind::RawResponse,
                json!({"raw_response": "reqs", "length": 4}),
            ),
        ];

        let report = log.append(&entries).unwrap();
        assert_eq!(report.written, 2);
        assert_eq!(report.cleaned, 0);

        let records = log.replay().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind(), Some(TraceKind::Prompt));
        match &records[1] {
            LoggedRecord::Entry { content, .. } => assert_eq!(content["length"], 4),
            other => panic!("unexpected record: {:?}", other),
        }
    }

    #[test]
    fn test_sentinel_does_not_abort_batch() {
        let (log, _temp) = temp_log();

        let entries = vec![
            TraceEntry::new("a", TraceKind::Info, "before"),
            TraceEntry::new("a", TraceKind::Info, Opaque::unrepresentable("Socket")),
            TraceEntry::new("a", TraceKind::Info, TraceValue::Float(f64::INFINITY)),
            TraceEntry::new("a", TraceKind::Info, "after"),
        ];

        let report = log.append(&entries).unwrap();
        assert_eq!(
            report,
            AppendReport {
                written: 4,
                cleaned: 1,
                sentinels: 1
            }
        );

        let records = log.replay().unwrap();
        assert_eq!(records.len(), 4);
        assert!(matches!(records[1], LoggedRecord::Unprocessable { .. }));
        assert_eq!(log.records_for_stage("a").unwrap().len(), 3);
    }

    #[test]
    fn test_journal_flushes_on_drop() {
        let (log, _temp) = temp_log();

        {
            let mut journal = TraceJournal::new(&log);
            let mut buffer = TraceBuffer::for_stage("writer");
            buffer.record(TraceKind::Prompt, "p");
            journal.absorb(buffer);
        }

        assert_eq!(log.replay().unwrap().len(), 1);
    }

    #[test]
    fn test_journal_flushes_once() {
        let (log, _temp) = temp_log();

        let mut journal = TraceJournal::new(&log);
        let mut buffer = TraceBuffer::for_stage("writer");
        buffer.record(TraceKind::Prompt, "p");
        buffer.record(TraceKind::RawResponse, "r");
        journal.absorb(buffer);
        assert_eq!(journal.entries().len(), 2);

        let report = journal.finish().unwrap();
        assert_eq!(report.written, 2);
        assert_eq!(log.replay().unwrap().len(), 2);
    }

    #[test]
    fn test_replay_missing_log_is_empty() {
        let (log, _temp) = temp_log();
        assert!(log.replay().unwrap().is_empty());
        assert_eq!(log.append(&[]).unwrap(), AppendReport::default());
        assert!(!log.path().exists());
    }
}
