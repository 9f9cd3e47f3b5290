//! Live subprocesses keyed by job id.

use std::collections::HashMap;

use sdjobs_core::types::JobId;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Handle to one running job's process.
///
/// Firing [`kill`](ProcessHandle::kill) asks the job's runner to terminate
/// the process; the runner owns the `Child` itself.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pub pid: Option<u32>,
    kill: CancellationToken,
}

impl ProcessHandle {
    pub fn new(pid: Option<u32>, kill: CancellationToken) -> Self {
        Self { pid, kill }
    }

    pub fn kill(&self) {
        self.kill.cancel();
    }

    pub fn is_killed(&self) -> bool {
        self.kill.is_cancelled()
    }
}

#[derive(Debug, Default)]
pub struct ActiveProcessRegistry {
    processes: RwLock<HashMap<JobId, ProcessHandle>>,
}

impl ActiveProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, job_id: &str, handle: ProcessHandle) {
        self.processes.write().await.insert(job_id.to_string(), handle);
    }

    /// Remove and return a job's handle. Removing twice is a no-op.
    pub async fn remove(&self, job_id: &str) -> Option<ProcessHandle> {
        self.processes.write().await.remove(job_id)
    }

    pub async fn contains(&self, job_id: &str) -> bool {
        self.processes.read().await.contains_key(job_id)
    }

    pub async fn len(&self) -> usize {
        self.processes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.processes.read().await.is_empty()
    }

    /// Fire every kill trigger not fired yet. Returns how many were fired.
    pub async fn kill_all(&self) -> usize {
        let processes = self.processes.read().await;
        processes
            .values()
            .filter(|handle| !handle.is_killed())
            .map(ProcessHandle::kill)
            .count()
    }
}
