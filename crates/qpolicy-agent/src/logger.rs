//! Append-only audit log of raw results.
//!
//! One [`AuditRecord`] is written per step. Sinks are shared by concurrent
//! episodes; a write failure is logged and counted but never reaches the
//! decoded action or the episode.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use qpolicy_hal::{Counts, SnapshotId};

use crate::decoder::{Action, Decoded};
use crate::executor::RawResult;

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Episode index.
    pub episode: u32,
    /// Step index within the episode.
    pub step: u32,
    /// When the record was written.
    pub timestamp: DateTime<Utc>,
    /// Fingerprint of the executed circuit.
    pub circuit_fingerprint: String,
    /// Calibration snapshot the circuit ran under.
    pub snapshot_id: SnapshotId,
    /// Whether that snapshot was a fallback after failed refreshes.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fallback_snapshot: bool,
    /// Shots requested.
    pub shots: u32,
    /// Measurement counts, sorted by bitstring.
    pub counts: Counts,
    /// Decoded action.
    pub action: Action,
    /// Decoder distribution.
    pub distribution: Vec<u64>,
    /// Backend execution time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
}

/// Destination of audit records.
pub trait AuditSink: Send + Sync {
    /// Append one record.
    fn append(&self, record: &AuditRecord) -> std::io::Result<()>;
}

/// JSON Lines file, opened in append mode and flushed after every record.
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonlSink {
    /// Open (or create) `path` for appending.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonlSink {
    fn append(&self, record: &AuditRecord) -> std::io::Result<()> {
        let line = serde_json::to_string(record)?;
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(writer, "{line}")?;
        writer.flush()
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every record appended so far.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AuditSink for MemorySink {
    fn append(&self, record: &AuditRecord) -> std::io::Result<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }
}

/// Discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl AuditSink for NullSink {
    fn append(&self, _record: &AuditRecord) -> std::io::Result<()> {
        Ok(())
    }
}

/// Per-episode writer in front of a shared sink.
pub struct ResultLogger {
    sink: Arc<dyn AuditSink>,
    episode: u32,
    failures: u64,
}

impl ResultLogger {
    /// Create a logger for `episode`.
    pub fn new(sink: Arc<dyn AuditSink>, episode: u32) -> Self {
        Self {
            sink,
            episode,
            failures: 0,
        }
    }

    /// Record one step. Failures are warned about and counted, never returned.
    pub fn record(
        &mut self,
        step: u32,
        raw: &RawResult,
        decoded: &Decoded,
        snapshot_id: SnapshotId,
        circuit_fingerprint: &str,
        fallback_snapshot: bool,
    ) {
        let record = AuditRecord {
            episode: self.episode,
            step,
            timestamp: Utc::now(),
            circuit_fingerprint: circuit_fingerprint.to_string(),
            snapshot_id,
            fallback_snapshot,
            shots: raw.shots,
            counts: raw.counts.clone(),
            action: decoded.action,
            distribution: decoded.distribution.clone(),
            execution_time_ms: raw.execution_time_ms,
        };
        if let Err(e) = self.sink.append(&record) {
            self.failures += 1;
            warn!(
                episode = self.episode,
                step,
                error = %e,
                "Failed to write audit record"
            );
        }
    }

    /// Number of records that could not be written.
    pub fn failures(&self) -> u64 {
        self.failures
    }
}

/// Read an audit log back.
pub fn read_jsonl(path: &Path) -> std::io::Result<Vec<AuditRecord>> {
    let text = std::fs::read_to_string(path)?;
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(std::io::Error::from))
        .collect()
}
