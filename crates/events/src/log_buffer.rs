//! In-memory history of every job's captured output.
//!
//! Entries are appended in arrival order and never mutated. The buffer is
//! unbounded and lives for the lifetime of the process.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use sdjobs_core::types::{now_millis, EpochMillis, JobId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// One line (stdout) or chunk (stderr) of captured output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub job_id: JobId,
    pub stream: LogStream,
    pub message: String,
    /// Position within the job's history, starting at 0.
    pub seq: u64,
    pub received_at: EpochMillis,
}

#[derive(Debug, Default)]
pub struct LogBuffer {
    entries: RwLock<HashMap<JobId, Vec<LogEntry>>>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message, assigning its sequence number and receipt time.
    pub fn append(&self, job_id: &str, stream: LogStream, message: impl Into<String>) -> LogEntry {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let history = entries.entry(job_id.to_string()).or_default();
        let entry = LogEntry {
            job_id: job_id.to_string(),
            stream,
            message: message.into(),
            seq: history.len() as u64,
            received_at: now_millis(),
        };
        history.push(entry.clone());
        entry
    }

    /// Snapshot of a job's history, `None` if nothing was ever captured.
    pub fn get(&self, job_id: &str) -> Option<Vec<LogEntry>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_id)
            .cloned()
    }

    pub fn len(&self, job_id: &str) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_id)
            .map_or(0, Vec::len)
    }
}
