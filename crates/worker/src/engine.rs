//! Job submission, status transitions and cancellation.

use std::sync::Arc;

use sdjobs_core::error::CoreError;
use sdjobs_core::job::{JobStatus, JobType, SubmitJob, CANCELLED_MESSAGE, ORPHANED_MESSAGE};
use sdjobs_core::types::now_millis;
use sdjobs_db::models::job::{Job, StatusUpdate};
use sdjobs_db::repositories::JobRepo;
use sdjobs_db::DbPool;
use sdjobs_events::{JobEventBus, LogBuffer};
use tokio_util::task::TaskTracker;

use crate::config::RunnerConfig;
use crate::error::EngineError;
use crate::registry::ActiveProcessRegistry;
use crate::runner::{self, JobRun};

/// Runs jobs and owns their live processes.
///
/// Cheaply cloneable; every clone drives the same registry and task tracker.
#[derive(Clone)]
pub struct JobEngine {
    pub(crate) pool: DbPool,
    pub(crate) config: Arc<RunnerConfig>,
    pub(crate) event_bus: Arc<JobEventBus>,
    pub(crate) log_buffer: Arc<LogBuffer>,
    pub(crate) registry: Arc<ActiveProcessRegistry>,
    pub(crate) redact_roots: Arc<Vec<String>>,
    tracker: TaskTracker,
}

impl JobEngine {
    pub fn new(
        pool: DbPool,
        config: RunnerConfig,
        event_bus: Arc<JobEventBus>,
        log_buffer: Arc<LogBuffer>,
    ) -> Self {
        let redact_roots = Arc::new(config.redact_roots());
        Self {
            pool,
            config: Arc::new(config),
            event_bus,
            log_buffer,
            registry: Arc::new(ActiveProcessRegistry::new()),
            redact_roots,
            tracker: TaskTracker::new(),
        }
    }

    pub fn registry(&self) -> &ActiveProcessRegistry {
        &self.registry
    }

    /// `false` once [`shutdown`](Self::shutdown) has begun.
    pub fn is_accepting(&self) -> bool {
        !self.tracker.is_closed()
    }

    // -----------------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------------

    /// Validate `request`, create its pending row and start its process in
    /// the background. Returns once the row exists.
    pub async fn submit(&self, request: SubmitJob) -> Result<Job, EngineError> {
        if !self.is_accepting() {
            return Err(CoreError::Conflict("Job engine is shutting down".into()).into());
        }

        let dirs = self.config.resource_dirs();
        let now = chrono::Utc::now();
        let (invocation, success_result) = match &request {
            SubmitJob::Generate(params) => {
                let invocation = params.to_invocation(&dirs, &self.config.output_dir, now)?;
                let result = params.artifact_reference(&invocation.output_path).to_string();
                (invocation, result)
            }
            SubmitJob::Convert(params) => {
                let invocation = params.to_invocation(&dirs, now)?;
                let result = invocation.output_path.to_string_lossy().into_owned();
                (invocation, result)
            }
        };

        let job = JobRepo::create(&self.pool, request.job_type()).await?;
        tracing::info!(job_id = %job.id, job_type = %job.job_type, "Job submitted");

        let run = JobRun {
            job_id: job.id.clone(),
            invocation,
            success_result,
        };
        let engine = self.clone();
        self.tracker.spawn(async move { runner::run(&engine, run).await });

        Ok(job)
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    /// Apply a status transition.
    ///
    /// Any transition into a terminal state also removes the job's process
    /// handle and fires its kill trigger. Returns `false` when the current
    /// status does not allow the transition.
    pub async fn update_status(&self, job_id: &str, update: &StatusUpdate) -> Result<bool, EngineError> {
        let applied = JobRepo::update_status(&self.pool, job_id, update).await?;

        if !applied {
            let Some(job) = JobRepo::find_by_id(&self.pool, job_id).await? else {
                return Err(not_found(job_id));
            };
            tracing::debug!(
                job_id,
                from = %job.status,
                to = %update.status,
                "Status transition rejected"
            );
            return Ok(false);
        }

        if update.status.is_terminal() {
            if let Some(handle) = self.registry.remove(job_id).await {
                tracing::debug!(job_id, pid = ?handle.pid, "Releasing process");
                handle.kill();
            }
        }
        Ok(true)
    }

    /// Cancel a job in whatever state it is in.
    pub async fn stop_job(&self, job_id: &str) -> Result<(), EngineError> {
        let update = StatusUpdate::finished(JobStatus::Cancelled, CANCELLED_MESSAGE, now_millis());
        self.update_status(job_id, &update).await?;
        tracing::info!(job_id, "Job cancelled");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn get(&self, job_id: &str) -> Result<Job, EngineError> {
        JobRepo::find_by_id(&self.pool, job_id)
            .await?
            .ok_or_else(|| not_found(job_id))
    }

    pub async fn list(&self, job_type: JobType) -> Result<Vec<Job>, EngineError> {
        Ok(JobRepo::list_by_type(&self.pool, job_type).await?)
    }

    /// Drop the jobs that produced an artifact that is being deleted.
    pub async fn forget_artifact(&self, job_type: JobType, reference: &str) -> Result<u64, EngineError> {
        let deleted = JobRepo::delete_by_result_substring(&self.pool, job_type, reference).await?;
        tracing::info!(job_type = %job_type, reference, deleted, "Jobs removed with artifact");
        Ok(deleted)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Fail jobs left pending or running by a previous server process.
    pub async fn reconcile(&self) -> Result<u64, EngineError> {
        let count = JobRepo::fail_orphaned(&self.pool, ORPHANED_MESSAGE).await?;
        if count > 0 {
            tracing::warn!(count, "Marked orphaned jobs as failed");
        }
        Ok(count)
    }

    /// Stop accepting jobs, terminate live processes and wait for every
    /// runner to record its outcome.
    pub async fn shutdown(&self) {
        self.tracker.close();
        let killed = self.registry.kill_all().await;
        tracing::info!(killed, running = self.tracker.len(), "Waiting for job runners");
        self.tracker.wait().await;
    }
}

fn not_found(job_id: &str) -> EngineError {
    CoreError::NotFound {
        entity: "job",
        id: job_id.to_string(),
    }
    .into()
}
