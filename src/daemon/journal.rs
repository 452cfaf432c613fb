// src/daemon/journal.rs

//! Append-only telemetry and action journals
//!
//! Every install attempt, retry, escalation, and user decision is recorded
//! as a single journal line: `{crc32_hex}|{json}\n`. The checksum lets a
//! reader detect lines truncated by power loss. One journal file carries
//! the daemon-wide telemetry stream; each title additionally gets its own
//! action journal under the journal directory.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// A record in the telemetry or per-title journal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JournalRecord {
    /// Install attempt dispatched
    AttemptStarted {
        attempt_id: String,
        title_id: String,
        title_name: String,
        source_path: PathBuf,
        force_reinstall: bool,
        timestamp: DateTime<Utc>,
    },

    /// Attempt succeeded (fresh install or restore)
    AttemptSucceeded {
        attempt_id: String,
        title_id: String,
        outcome: String,
        timestamp: DateTime<Utc>,
    },

    /// Attempt failed after rollback
    AttemptFailed {
        attempt_id: String,
        title_id: String,
        reason: String,
        retry_count: u32,
        timestamp: DateTime<Utc>,
    },

    /// Retry budget exhausted, title parked for repair
    Escalated {
        title_id: String,
        retry_count: u32,
        timestamp: DateTime<Utc>,
    },

    /// User resolved a parked title
    UserDecision {
        title_id: String,
        decision: String,
        timestamp: DateTime<Utc>,
    },

    /// Daemon shut down cleanly
    Shutdown {
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl JournalRecord {
    /// Title this record belongs to, if any
    pub fn title_id(&self) -> Option<&str> {
        match self {
            Self::AttemptStarted { title_id, .. }
            | Self::AttemptSucceeded { title_id, .. }
            | Self::AttemptFailed { title_id, .. }
            | Self::Escalated { title_id, .. }
            | Self::UserDecision { title_id, .. } => Some(title_id),
            Self::Shutdown { .. } => None,
        }
    }
}

/// Append-only journal file with per-line checksums
pub struct ActionJournal {
    path: PathBuf,
    file: File,
}

impl ActionJournal {
    /// Open (creating as needed) the journal at `path`
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    /// Append one record and flush it to disk
    pub fn append(&mut self, record: &JournalRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let crc = crc32fast::hash(json.as_bytes());
        writeln!(self.file, "{crc:08x}|{json}")?;
        self.file.sync_data()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record back, verifying checksums
    ///
    /// A line whose checksum does not match is reported as corrupt; the
    /// trailing line of a crashed run is the usual culprit.
    pub fn read_all(path: &Path) -> Result<Vec<JournalRecord>> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut records = Vec::new();

        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let Some((crc_hex, json)) = line.split_once('|') else {
                return Err(Error::CorruptJournal {
                    path: path.to_path_buf(),
                    detail: "missing checksum separator".to_string(),
                });
            };
            let expected = u32::from_str_radix(crc_hex, 16).map_err(|_| Error::CorruptJournal {
                path: path.to_path_buf(),
                detail: format!("bad checksum field: {crc_hex}"),
            })?;
            let actual = crc32fast::hash(json.as_bytes());
            if expected != actual {
                return Err(Error::CorruptJournal {
                    path: path.to_path_buf(),
                    detail: format!("checksum mismatch: {expected:08x} != {actual:08x}"),
                });
            }
            records.push(serde_json::from_str(json)?);
        }
        Ok(records)
    }
}

/// Sink for the daemon-wide telemetry journal plus per-title action
/// journals
pub struct JournalSink {
    telemetry: ActionJournal,
    journal_dir: PathBuf,
}

impl JournalSink {
    pub fn new(telemetry_path: impl Into<PathBuf>, journal_dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            telemetry: ActionJournal::open(telemetry_path)?,
            journal_dir: journal_dir.into(),
        })
    }

    /// Record to the telemetry journal and, when the record names a title,
    /// to that title's own journal
    pub fn record(&mut self, record: &JournalRecord) -> Result<()> {
        self.telemetry.append(record)?;
        if let Some(title_id) = record.title_id() {
            let path = self.title_journal_path(title_id);
            ActionJournal::open(path)?.append(record)?;
        }
        Ok(())
    }

    pub fn title_journal_path(&self, title_id: &str) -> PathBuf {
        self.journal_dir.join(format!("{title_id}.journal"))
    }
}
