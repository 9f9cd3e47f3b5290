use serde::Serialize;
use sqlx::FromRow;

use sdjobs_core::job::{JobStatus, JobType};
use sdjobs_core::types::{EpochMillis, JobId};

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    #[sqlx(rename = "type", try_from = "String")]
    #[serde(rename = "type")]
    pub job_type: JobType,
    #[sqlx(try_from = "String")]
    pub status: JobStatus,
    pub created_at: EpochMillis,
    pub started_at: Option<EpochMillis>,
    pub completed_at: Option<EpochMillis>,
    pub result: Option<String>,
}

/// Target state of a status transition plus the columns it stamps.
///
/// `None` fields leave the stored value untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: JobStatus,
    pub started_at: Option<EpochMillis>,
    pub completed_at: Option<EpochMillis>,
    pub result: Option<String>,
}

impl StatusUpdate {
    pub fn running(now: EpochMillis) -> Self {
        Self {
            status: JobStatus::Running,
            started_at: Some(now),
            completed_at: None,
            result: None,
        }
    }

    /// A terminal transition; `completed_at` is stamped with `now`.
    pub fn finished(status: JobStatus, result: impl Into<String>, now: EpochMillis) -> Self {
        Self {
            status,
            started_at: None,
            completed_at: Some(now),
            result: Some(result.into()),
        }
    }
}
