//! One job's process from spawn to recorded outcome.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use sdjobs_core::args::Invocation;
use sdjobs_core::error::CoreError;
use sdjobs_core::job::JobStatus;
use sdjobs_core::output::OutputFilter;
use sdjobs_core::types::{now_millis, JobId};
use sdjobs_db::models::job::StatusUpdate;
use sdjobs_db::repositories::JobRepo;
use sdjobs_events::JobEvent;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::engine::JobEngine;
use crate::error::EngineError;
use crate::registry::ProcessHandle;
use crate::streams::{self, LogSink, Watchdog};

pub(crate) struct JobRun {
    pub job_id: JobId,
    pub invocation: Invocation,
    /// Result stored when the process exits with status 0.
    pub success_result: String,
}

pub(crate) async fn run(engine: &JobEngine, run: JobRun) {
    let JobRun {
        job_id,
        invocation,
        success_result,
    } = run;
    let config = &engine.config;

    if let Some(parent) = invocation.output_path.parent() {
        let dir = config.working_dir.join(parent);
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            tracing::warn!(job_id = %job_id, dir = %dir.display(), error = %e, "Failed to create output directory");
        }
    }

    let mut command = Command::new(&config.executable);
    command
        .args(&invocation.args)
        .current_dir(&config.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "Failed to spawn process");
            let message = format!("Failed to spawn {}: {e}", config.executable.display());
            finish(engine, &job_id, JobStatus::Failed, message).await;
            return;
        }
    };

    // Registered before the running transition so a concurrent stop always
    // finds either the handle or a status that rejects `running`.
    let kill = CancellationToken::new();
    engine
        .registry
        .insert(&job_id, ProcessHandle::new(child.id(), kill.clone()))
        .await;

    match engine.update_status(&job_id, &StatusUpdate::running(now_millis())).await {
        Ok(true) => tracing::info!(job_id = %job_id, pid = ?child.id(), "Process started"),
        Ok(false) => {
            tracing::info!(job_id = %job_id, "Job stopped before start, terminating process");
            kill.cancel();
        }
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "Failed to mark job running");
            kill.cancel();
        }
    }

    let exited = CancellationToken::new();
    let sink = LogSink {
        job_id: job_id.clone(),
        buffer: engine.log_buffer.clone(),
        bus: engine.event_bus.clone(),
    };
    let stdout_task = child.stdout.take().map(|stdout| {
        let filter = OutputFilter::new(engine.redact_roots.to_vec());
        tokio::spawn(streams::read_stdout(stdout, filter, sink.clone()))
    });
    let stderr_task = child.stderr.take().map(|stderr| {
        let watchdog = Watchdog {
            delay: config.stderr_watchdog,
            kill: kill.clone(),
            exited: exited.clone(),
        };
        tokio::spawn(streams::read_stderr(stderr, sink.clone(), watchdog))
    });

    let wait_result = tokio::select! {
        status = child.wait() => status,
        _ = kill.cancelled() => terminate(&mut child, config.kill_grace).await,
    };
    exited.cancel();

    for task in [stdout_task, stderr_task].into_iter().flatten() {
        if let Err(e) = task.await {
            tracing::warn!(job_id = %job_id, error = %e, "Output reader panicked");
        }
    }

    let (status, result) = match wait_result {
        Ok(exit) if exit.success() => (JobStatus::Completed, success_result),
        Ok(exit) => (JobStatus::Failed, exit_message(exit)),
        Err(e) => (JobStatus::Failed, format!("Failed to wait for process: {e}")),
    };
    // The process is gone; release its handle before the outcome goes out.
    engine.registry.remove(&job_id).await;
    finish(engine, &job_id, status, result).await;
}

/// Record the outcome and announce it.
///
/// If the transition is rejected (the job was cancelled meanwhile) the stored
/// outcome is announced instead. When no stored outcome can be read (row
/// deleted mid-run, database error) the computed one is announced so
/// viewers still see the stream end.
async fn finish(engine: &JobEngine, job_id: &str, status: JobStatus, result: String) {
    let update = StatusUpdate::finished(status, result.clone(), now_millis());
    let (status, result) = match engine.update_status(job_id, &update).await {
        Ok(true) => (status, result),
        Ok(false) => match JobRepo::find_by_id(&engine.pool, job_id).await {
            Ok(Some(job)) => (job.status, job.result.unwrap_or_default()),
            Ok(None) => {
                tracing::warn!(job_id, "Job row deleted before its outcome was recorded");
                (status, result)
            }
            Err(e) => {
                tracing::error!(job_id, error = %e, "Failed to load job outcome");
                (status, result)
            }
        },
        Err(EngineError::Core(CoreError::NotFound { .. })) => {
            tracing::warn!(job_id, "Job row deleted before its outcome was recorded");
            (status, result)
        }
        Err(e) => {
            tracing::error!(job_id, error = %e, "Failed to record job outcome");
            (status, result)
        }
    };

    match JobEvent::terminal(job_id, status, result) {
        Some(event) => {
            tracing::info!(job_id, status = %status, "Job finished");
            engine.event_bus.publish(event);
        }
        None => tracing::warn!(job_id, status = %status, "Job left in a non-terminal state"),
    }
}

/// SIGTERM, then SIGKILL once `grace` has passed.
async fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        if let Some(pid) = child.id() {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
    }
    #[cfg(not(unix))]
    child.start_kill()?;

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            tracing::warn!(pid = ?child.id(), "Process ignored SIGTERM, killing");
            child.start_kill()?;
            child.wait().await
        }
    }
}

fn exit_message(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("Process exited with code {code}");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("Process terminated by signal {signal}");
        }
    }
    "Process terminated".to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
