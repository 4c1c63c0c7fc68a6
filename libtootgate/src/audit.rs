//! Append-only audit log of every decision and remote interaction in a run
//!
//! Entries live in memory for the whole run and are written out once, at the
//! end, as a CSV file named after the run's start time. A failed write is
//! reported and otherwise ignored; the in-memory log is never lost because of it.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{debug, error, info};
use uuid::Uuid;

/// One audit record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub seq: u64,
    pub task: String,
    pub detail: String,
    pub timestamp: String,
}

/// Ordered, append-only log for a single run
///
/// Single writer: the owning session appends through `&mut self`.
#[derive(Debug)]
pub struct AuditLog {
    run_id: Uuid,
    tz: Tz,
    started_at: DateTime<Tz>,
    entries: Vec<LogEntry>,
    next_seq: u64,
}

impl AuditLog {
    pub fn new(tz: Tz) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            tz,
            started_at: Utc::now().with_timezone(&tz),
            entries: Vec::new(),
            next_seq: 1,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn started_at(&self) -> DateTime<Tz> {
        self.started_at
    }

    /// Record an entry and return its sequence number
    pub fn append(&mut self, task: impl Into<String>, detail: impl Into<String>) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;

        let entry = LogEntry {
            seq,
            task: task.into(),
            detail: detail.into(),
            timestamp: Utc::now()
                .with_timezone(&self.tz)
                .to_rfc3339_opts(SecondsFormat::Millis, false),
        };
        debug!(seq, task = %entry.task, detail = %entry.detail, "audit");

        self.entries.push(entry);
        seq
    }

    /// Record a structured payload as compact JSON
    pub fn append_json<T: Serialize + ?Sized>(&mut self, task: impl Into<String>, payload: &T) -> u64 {
        let detail = serde_json::to_string(payload)
            .unwrap_or_else(|e| format!("{{\"unserializable\":\"{}\"}}", e));
        self.append(task, detail)
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First entry recorded under `task`
    pub fn find(&self, task: &str) -> Option<&LogEntry> {
        self.entries.iter().find(|e| e.task == task)
    }

    pub fn contains_task(&self, task: &str) -> bool {
        self.find(task).is_some()
    }

    /// `tootgate-YYYYMMDD-HHMMSS.csv`, from the run start time
    pub fn file_name(&self) -> String {
        format!("tootgate-{}.csv", self.started_at.format("%Y%m%d-%H%M%S"))
    }

    /// Write the log as CSV with a `task,details,timestamp` header
    pub fn write_csv(&self, path: &Path) -> std::io::Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        writeln!(out, "task,details,timestamp")?;
        for entry in &self.entries {
            writeln!(
                out,
                "{},{},{}",
                csv_field(&entry.task),
                csv_field(&entry.detail),
                csv_field(&entry.timestamp)
            )?;
        }
        out.flush()
    }

    /// Write the log into `dir`, creating it if needed
    ///
    /// Returns the written path, or `None` if the write failed. Failures are
    /// reported through tracing and never propagate.
    pub fn flush(&self, dir: &Path) -> Option<PathBuf> {
        let path = dir.join(self.file_name());
        let result = fs::create_dir_all(dir).and_then(|_| self.write_csv(&path));

        match result {
            Ok(()) => {
                info!(path = %path.display(), entries = self.entries.len(), "Audit log written");
                Some(path)
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to write audit log");
                None
            }
        }
    }
}

/// Quote a field when it contains a delimiter, quote or line break
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
