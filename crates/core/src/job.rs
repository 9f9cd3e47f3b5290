//! Job identity, lifecycle and submission payloads.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::args::{ConvertParams, GenerateParams};
use crate::error::CoreError;

/// Result text written when a job is stopped on request.
pub const CANCELLED_MESSAGE: &str = "Job cancelled by user";

/// Result text written at startup for jobs whose process did not survive.
pub const ORPHANED_MESSAGE: &str = "Job interrupted by server restart";

// ---------------------------------------------------------------------------
// JobType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Generate,
    Convert,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::Convert => "convert",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generate" => Ok(Self::Generate),
            "convert" => Ok(Self::Convert),
            other => Err(CoreError::Validation(format!("unknown job type '{other}'"))),
        }
    }
}

impl TryFrom<String> for JobType {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a job.
///
/// `pending -> running -> {completed | failed | cancelled}`. A spawn failure
/// goes straight from `pending` to `failed`; `cancelled` can be written from
/// any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        Self::Pending,
        Self::Running,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// States a job may be in for a transition into `self` to apply.
    pub fn allowed_predecessors(self) -> &'static [JobStatus] {
        match self {
            Self::Pending => &[],
            Self::Running => &[Self::Pending],
            Self::Completed => &[Self::Running],
            Self::Failed => &[Self::Pending, Self::Running],
            Self::Cancelled => &Self::ALL,
        }
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        next.allowed_predecessors().contains(&self)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CoreError::Validation(format!("unknown job status '{s}'")))
    }
}

impl TryFrom<String> for JobStatus {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// Body of `POST /jobs`: `{"type": "generate", "params": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", rename_all = "lowercase")]
pub enum SubmitJob {
    Generate(GenerateParams),
    Convert(ConvertParams),
}

impl SubmitJob {
    pub fn job_type(&self) -> JobType {
        match self {
            Self::Generate(_) => JobType::Generate,
            Self::Convert(_) => JobType::Convert,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
