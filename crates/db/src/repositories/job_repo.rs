//! Repository for the `jobs` table.
//!
//! Every status change is a single guarded `UPDATE`: the row only moves if
//! its current status is one of the target's allowed predecessors, so
//! concurrent writers cannot move a job backwards.

use sdjobs_core::job::{JobStatus, JobType};
use sdjobs_core::types::{new_job_id, now_millis, EpochMillis};

use crate::models::job::{Job, StatusUpdate};
use crate::DbPool;

/// Column list for `jobs` queries.
const COLUMNS: &str = "id, type, status, created_at, started_at, completed_at, result";

/// Statuses a job can only have while its process may still be alive.
const LIVE_STATUSES: [JobStatus; 2] = [JobStatus::Pending, JobStatus::Running];

/// Provides persistence operations for jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert a new pending job and return the stored row.
    pub async fn create(pool: &DbPool, job_type: JobType) -> Result<Job, sqlx::Error> {
        let query = format!(
            "INSERT INTO jobs (id, type, status, created_at) \
             VALUES (?, ?, ?, ?) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(new_job_id())
            .bind(job_type.as_str())
            .bind(JobStatus::Pending.as_str())
            .bind(now_millis())
            .fetch_one(pool)
            .await
    }

    /// Find a job by its ID.
    pub async fn find_by_id(pool: &DbPool, id: &str) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = ?");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// All jobs of one type, newest first.
    pub async fn list_by_type(pool: &DbPool, job_type: JobType) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs WHERE type = ? ORDER BY created_at DESC, id DESC"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(job_type.as_str())
            .fetch_all(pool)
            .await
    }

    /// Apply a status transition.
    ///
    /// Returns `true` if the row changed, `false` if the job does not exist or
    /// its current status does not allow the transition.
    pub async fn update_status(
        pool: &DbPool,
        id: &str,
        update: &StatusUpdate,
    ) -> Result<bool, sqlx::Error> {
        let allowed = update.status.allowed_predecessors();
        if allowed.is_empty() {
            return Ok(false);
        }

        let query = format!(
            "UPDATE jobs \
             SET status = ?, \
                 started_at = COALESCE(?, started_at), \
                 completed_at = COALESCE(?, completed_at), \
                 result = COALESCE(?, result) \
             WHERE id = ? AND status IN ({})",
            placeholders(allowed.len())
        );
        let mut q = sqlx::query(&query)
            .bind(update.status.as_str())
            .bind(update.started_at)
            .bind(update.completed_at)
            .bind(update.result.as_deref())
            .bind(id);
        for status in allowed {
            q = q.bind(status.as_str());
        }

        let result = q.execute(pool).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete jobs of `job_type` whose result mentions `reference`.
    ///
    /// Used when an artifact is removed so its producing jobs go with it. An
    /// empty reference matches nothing.
    pub async fn delete_by_result_substring(
        pool: &DbPool,
        job_type: JobType,
        reference: &str,
    ) -> Result<u64, sqlx::Error> {
        if reference.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "DELETE FROM jobs \
             WHERE type = ? AND result IS NOT NULL AND instr(result, ?) > 0",
        )
        .bind(job_type.as_str())
        .bind(reference)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete finished jobs created before `cutoff`. Pending and running jobs
    /// are kept whatever their age. Returns the number of rows removed.
    pub async fn delete_older_than(pool: &DbPool, cutoff: EpochMillis) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM jobs WHERE created_at < ? AND status NOT IN (?, ?)")
            .bind(cutoff)
            .bind(LIVE_STATUSES[0].as_str())
            .bind(LIVE_STATUSES[1].as_str())
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Mark every pending or running job as failed with `message`.
    ///
    /// Called once at startup: no process outlives the server, so these rows
    /// would otherwise never reach a terminal state.
    pub async fn fail_orphaned(pool: &DbPool, message: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs SET status = ?, completed_at = ?, result = ? \
             WHERE status IN (?, ?)",
        )
        .bind(JobStatus::Failed.as_str())
        .bind(now_millis())
        .bind(message)
        .bind(LIVE_STATUSES[0].as_str())
        .bind(LIVE_STATUSES[1].as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}
