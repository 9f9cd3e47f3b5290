//! Periodic cleanup of old jobs.
//!
//! Deletes finished rows from `jobs` created before the retention cutoff. Runs on a
//! fixed interval using `tokio::time::interval`.

use std::time::Duration;

use sdjobs_core::types::now_millis;
use sdjobs_db::repositories::JobRepo;
use sdjobs_db::DbPool;
use tokio_util::sync::CancellationToken;

/// How often the cleanup job runs.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600); // 1 hour

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Run the job retention loop until `cancel` is triggered.
pub async fn run(pool: DbPool, retention_days: i64, cancel: CancellationToken) {
    tracing::info!(
        retention_days,
        interval_secs = CLEANUP_INTERVAL.as_secs(),
        "Job retention task started"
    );

    let mut interval = tokio::time::interval(CLEANUP_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Job retention task stopping");
                break;
            }
            _ = interval.tick() => {
                sweep(&pool, retention_days).await;
            }
        }
    }
}

/// Delete jobs older than `retention_days`. Returns the number removed.
pub async fn sweep(pool: &DbPool, retention_days: i64) -> u64 {
    let cutoff = now_millis() - retention_days * MILLIS_PER_DAY;
    match JobRepo::delete_older_than(pool, cutoff).await {
        Ok(deleted) => {
            if deleted > 0 {
                tracing::info!(deleted, "Job retention: purged old jobs");
            } else {
                tracing::debug!("Job retention: no jobs to purge");
            }
            deleted
        }
        Err(e) => {
            tracing::error!(error = %e, "Job retention: cleanup failed");
            0
        }
    }
}
