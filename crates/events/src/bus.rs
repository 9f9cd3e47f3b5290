//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`JobEventBus`] carries every job's live output and terminal outcome. It
//! is shared via `Arc<JobEventBus>`; subscribers filter by job id themselves.

use sdjobs_core::job::JobStatus;
use sdjobs_core::types::JobId;
use tokio::sync::broadcast;

use crate::log_buffer::LogEntry;

// ---------------------------------------------------------------------------
// JobEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// One captured output line.
    Log(LogEntry),

    /// The job finished successfully; `result` is its artifact reference.
    Complete { job_id: JobId, result: String },

    /// The job failed or was cancelled; `result` is the stored message.
    Error { job_id: JobId, result: String },
}

impl JobEvent {
    /// The event announcing that a job reached `status`, `None` while the job
    /// is still pending or running.
    pub fn terminal(job_id: &str, status: JobStatus, result: String) -> Option<Self> {
        let job_id = job_id.to_string();
        match status {
            JobStatus::Completed => Some(Self::Complete { job_id, result }),
            JobStatus::Failed | JobStatus::Cancelled => Some(Self::Error { job_id, result }),
            JobStatus::Pending | JobStatus::Running => None,
        }
    }

    pub fn job_id(&self) -> &str {
        match self {
            Self::Log(entry) => &entry.job_id,
            Self::Complete { job_id, .. } | Self::Error { job_id, .. } => job_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Log(_))
    }
}

// ---------------------------------------------------------------------------
// JobEventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// Wraps a [`broadcast::Sender`] so that any number of subscribers can
/// independently receive every published [`JobEvent`].
///
/// # Usage
///
/// ```rust
/// use sdjobs_events::bus::{JobEvent, JobEventBus};
///
/// let bus = JobEventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(JobEvent::Complete { job_id: "j1".into(), result: "out.png".into() });
/// ```
pub struct JobEventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl JobEventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped.
    pub fn publish(&self, event: JobEvent) {
        // Ignore the SendError, it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for JobEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
