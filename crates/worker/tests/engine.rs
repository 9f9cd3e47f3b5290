#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use sdjobs_core::args::{ConvertParams, GenerateParams};
use sdjobs_core::error::CoreError;
use sdjobs_core::job::{JobStatus, JobType, SubmitJob};
use sdjobs_events::{JobEvent, JobEventBus, LogBuffer, LogStream};
use sdjobs_worker::{EngineError, JobEngine, RunnerConfig};
use tempfile::TempDir;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Harness {
    engine: JobEngine,
    pool: sdjobs_db::DbPool,
    bus: Arc<JobEventBus>,
    logs: Arc<LogBuffer>,
    _dir: TempDir,
}

/// Write `body` as an executable shell script and build an engine around it.
async fn harness(body: &str) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("fake-sd.sh");
    std::fs::write(&script, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    harness_with(dir, script).await
}

async fn harness_with(dir: TempDir, executable: PathBuf) -> Harness {
    let config = RunnerConfig {
        executable,
        working_dir: dir.path().to_path_buf(),
        output_dir: dir.path().join("outputs"),
        models_dir: dir.path().join("models"),
        stderr_watchdog: Duration::from_millis(200),
        kill_grace: Duration::from_millis(500),
    };
    let pool = sdjobs_db::create_in_memory_pool().await.unwrap();
    let bus = Arc::new(JobEventBus::default());
    let logs = Arc::new(LogBuffer::new());
    let engine = JobEngine::new(pool.clone(), config, Arc::clone(&bus), Arc::clone(&logs));
    Harness {
        engine,
        pool,
        bus,
        logs,
        _dir: dir,
    }
}

fn generate() -> SubmitJob {
    SubmitJob::Generate(GenerateParams {
        model: "sd15.gguf".into(),
        prompt: "a lighthouse at dusk".into(),
        seed: Some(42.0),
        ..Default::default()
    })
}

/// Next terminal event for `job_id`.
async fn outcome(rx: &mut broadcast::Receiver<JobEvent>, job_id: &str) -> JobEvent {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = rx.recv().await.expect("bus open");
            if event.job_id() == job_id && event.is_terminal() {
                return event;
            }
        }
    })
    .await
    .expect("job should finish")
}

/// Next log event for `job_id`.
async fn first_log(rx: &mut broadcast::Receiver<JobEvent>, job_id: &str) -> String {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let JobEvent::Log(entry) = rx.recv().await.expect("bus open") {
                if entry.job_id == job_id {
                    return entry.message;
                }
            }
        }
    })
    .await
    .expect("job should log")
}

fn stdout_lines(logs: &LogBuffer, job_id: &str) -> Vec<String> {
    logs.get(job_id)
        .unwrap_or_default()
        .into_iter()
        .filter(|e| e.stream == LogStream::Stdout)
        .map(|e| e.message)
        .collect()
}

async fn status_of(engine: &JobEngine, job_id: &str) -> JobStatus {
    engine.get(job_id).await.unwrap().status
}

// ---------------------------------------------------------------------------
// Test: successful runs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn successful_generate_completes_with_artifact_reference() {
    let h = harness("echo 'loading model'\necho 'sampling'\nexit 0").await;
    let mut rx = h.bus.subscribe();

    let job = h.engine.submit(generate()).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);

    let event = outcome(&mut rx, &job.id).await;
    let result = assert_matches!(event, JobEvent::Complete { result, .. } => result);
    let reference: serde_json::Value = serde_json::from_str(&result).unwrap();
    assert!(reference["output"].as_str().unwrap().ends_with(".png"));
    assert_eq!(reference["seed"], 42);
    assert_eq!(reference["prompt"], "a lighthouse at dusk");

    let stored = h.engine.get(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert!(stored.started_at.is_some());
    assert!(stored.completed_at.is_some());
    assert_eq!(stored.result.as_deref(), Some(result.as_str()));

    assert_eq!(stdout_lines(&h.logs, &job.id), vec!["loading model", "sampling"]);
    assert!(h.engine.registry().is_empty().await);
}

#[tokio::test]
async fn progress_redraws_are_collapsed() {
    let h = harness(r"printf '|====    | 3/10\033[K|=====   | 4/10\nDone\n'").await;
    let mut rx = h.bus.subscribe();

    let job = h.engine.submit(generate()).await.unwrap();
    assert_matches!(outcome(&mut rx, &job.id).await, JobEvent::Complete { .. });

    assert_eq!(stdout_lines(&h.logs, &job.id), vec!["|=====   | 4/10", "Done"]);
}

#[tokio::test]
async fn convert_passes_arguments_and_reports_output_path() {
    let h = harness(r#"echo "args: $*""#).await;
    let mut rx = h.bus.subscribe();

    let job = h
        .engine
        .submit(SubmitJob::Convert(ConvertParams {
            model: "sd15.safetensors".into(),
            quantization: "q8_0".into(),
            ..Default::default()
        }))
        .await
        .unwrap();
    assert_eq!(job.job_type, JobType::Convert);

    let result = assert_matches!(outcome(&mut rx, &job.id).await, JobEvent::Complete { result, .. } => result);
    assert!(result.ends_with(".gguf"));

    let lines = stdout_lines(&h.logs, &job.id);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("-M convert"));
    assert!(lines[0].contains("--type q8_0"));
    // Absolute model paths are redacted from captured output.
    assert!(lines[0].contains("-m checkpoints/sd15.safetensors"), "{}", lines[0]);
    assert!(lines[0].ends_with(".gguf"));
}

#[tokio::test]
async fn live_subscriber_sees_lines_in_order() {
    let h = harness("for i in 1 2 3 4 5; do echo \"line $i\"; done").await;
    let mut rx = h.bus.subscribe();

    let job = h.engine.submit(generate()).await.unwrap();

    let mut live = Vec::new();
    loop {
        match rx.recv().await.unwrap() {
            JobEvent::Log(entry) if entry.job_id == job.id => live.push(entry.message),
            event if event.job_id() == job.id && event.is_terminal() => break,
            _ => {}
        }
    }
    let expected: Vec<_> = (1..=5).map(|i| format!("line {i}")).collect();
    assert_eq!(live, expected);
    assert_eq!(stdout_lines(&h.logs, &job.id), expected);
}

// ---------------------------------------------------------------------------
// Test: failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn non_zero_exit_fails_with_code() {
    let h = harness("echo 'bad model file'\nexit 3").await;
    let mut rx = h.bus.subscribe();

    let job = h.engine.submit(generate()).await.unwrap();
    let result = assert_matches!(outcome(&mut rx, &job.id).await, JobEvent::Error { result, .. } => result);
    assert_eq!(result, "Process exited with code 3");
    assert_eq!(status_of(&h.engine, &job.id).await, JobStatus::Failed);
}

#[tokio::test]
async fn missing_executable_fails_without_logs() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("no-such-binary");
    let h = harness_with(dir, missing).await;
    let mut rx = h.bus.subscribe();

    let job = h.engine.submit(generate()).await.unwrap();
    let result = assert_matches!(outcome(&mut rx, &job.id).await, JobEvent::Error { result, .. } => result);
    assert!(result.contains("Failed to spawn"), "{result}");

    let stored = h.engine.get(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert!(stored.started_at.is_none());
    assert!(h.logs.get(&job.id).is_none());
}

#[tokio::test]
async fn stderr_output_without_exit_trips_watchdog() {
    let h = harness("echo 'ggml_cuda_init: out of memory' >&2\nexec sleep 30").await;
    let mut rx = h.bus.subscribe();

    let job = h.engine.submit(generate()).await.unwrap();
    let result = assert_matches!(outcome(&mut rx, &job.id).await, JobEvent::Error { result, .. } => result);
    assert_eq!(result, "Process terminated by signal 15");

    let stderr: Vec<_> = h
        .logs
        .get(&job.id)
        .unwrap()
        .into_iter()
        .filter(|e| e.stream == LogStream::Stderr)
        .map(|e| e.message)
        .collect();
    assert_eq!(stderr, vec!["ggml_cuda_init: out of memory"]);
}

#[tokio::test]
async fn stderr_before_quick_exit_keeps_exit_status() {
    let h = harness("echo 'warning: deprecated flag' >&2\nexit 0").await;
    let mut rx = h.bus.subscribe();

    let job = h.engine.submit(generate()).await.unwrap();
    assert_matches!(outcome(&mut rx, &job.id).await, JobEvent::Complete { .. });
}

#[tokio::test]
async fn invalid_request_creates_no_row() {
    let h = harness("exit 0").await;
    let err = h
        .engine
        .submit(SubmitJob::Generate(GenerateParams {
            model: "sd15.gguf".into(),
            ..Default::default()
        }))
        .await
        .unwrap_err();
    assert_matches!(err, EngineError::Core(CoreError::Validation(_)));
    assert!(h.engine.list(JobType::Generate).await.unwrap().is_empty());
}

#[tokio::test]
async fn path_escape_is_rejected() {
    let h = harness("exit 0").await;
    let err = h
        .engine
        .submit(SubmitJob::Generate(GenerateParams {
            model: "../../etc/passwd".into(),
            prompt: "x".into(),
            ..Default::default()
        }))
        .await
        .unwrap_err();
    assert_matches!(err, EngineError::Core(CoreError::Validation(_)));
}

// ---------------------------------------------------------------------------
// Test: cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stop_running_job_terminates_process() {
    let h = harness("echo started\nexec sleep 30").await;
    let mut rx = h.bus.subscribe();

    let job = h.engine.submit(generate()).await.unwrap();
    assert_eq!(first_log(&mut rx, &job.id).await, "started");

    h.engine.stop_job(&job.id).await.unwrap();
    assert_eq!(status_of(&h.engine, &job.id).await, JobStatus::Cancelled);
    assert!(!h.engine.registry().contains(&job.id).await);

    let result = assert_matches!(outcome(&mut rx, &job.id).await, JobEvent::Error { result, .. } => result);
    assert_eq!(result, "Job cancelled by user");

    let stored = h.engine.get(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Cancelled);
    assert_eq!(stored.result.as_deref(), Some("Job cancelled by user"));
}

#[tokio::test]
async fn stop_after_completion_still_marks_cancelled() {
    let h = harness("echo done").await;
    let mut rx = h.bus.subscribe();

    let job = h.engine.submit(generate()).await.unwrap();
    assert_matches!(outcome(&mut rx, &job.id).await, JobEvent::Complete { .. });

    h.engine.stop_job(&job.id).await.unwrap();
    assert_eq!(status_of(&h.engine, &job.id).await, JobStatus::Cancelled);
}

#[tokio::test]
async fn stop_unknown_job_is_not_found() {
    let h = harness("exit 0").await;
    let err = h.engine.stop_job("no-such-job").await.unwrap_err();
    assert_matches!(err, EngineError::Core(CoreError::NotFound { .. }));
}

#[tokio::test]
async fn shutdown_terminates_live_jobs_and_rejects_new_ones() {
    let h = harness("echo started\nexec sleep 30").await;
    let mut rx = h.bus.subscribe();

    let job = h.engine.submit(generate()).await.unwrap();
    first_log(&mut rx, &job.id).await;

    tokio::time::timeout(Duration::from_secs(10), h.engine.shutdown())
        .await
        .expect("shutdown should finish");
    assert_eq!(status_of(&h.engine, &job.id).await, JobStatus::Failed);

    let err = h.engine.submit(generate()).await.unwrap_err();
    assert_matches!(err, EngineError::Core(CoreError::Conflict(_)));
}

// ---------------------------------------------------------------------------
// Test: housekeeping
// ---------------------------------------------------------------------------

#[tokio::test]
async fn forget_artifact_removes_producing_job() {
    let h = harness("exit 0").await;
    let mut rx = h.bus.subscribe();

    let job = h.engine.submit(generate()).await.unwrap();
    let result = assert_matches!(outcome(&mut rx, &job.id).await, JobEvent::Complete { result, .. } => result);
    let reference: serde_json::Value = serde_json::from_str(&result).unwrap();
    let output = reference["output"].as_str().unwrap();
    let file_name = Path::new(output).file_name().unwrap().to_str().unwrap();

    let deleted = h.engine.forget_artifact(JobType::Generate, file_name).await.unwrap();
    assert_eq!(deleted, 1);
    assert_matches!(
        h.engine.get(&job.id).await,
        Err(EngineError::Core(CoreError::NotFound { .. }))
    );
}

// ---------------------------------------------------------------------------
// Test: row deleted while the process runs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deleted_row_still_announces_outcome() {
    let h = harness("echo started\nsleep 0.5\necho done").await;
    let mut rx = h.bus.subscribe();

    let job = h.engine.submit(generate()).await.unwrap();
    assert_eq!(first_log(&mut rx, &job.id).await, "started");

    sqlx::query("DELETE FROM jobs WHERE id = ?")
        .bind(&job.id)
        .execute(&h.pool)
        .await
        .unwrap();

    let result = assert_matches!(outcome(&mut rx, &job.id).await, JobEvent::Complete { result, .. } => result);
    assert!(result.contains(".png"));
    assert_matches!(h.engine.get(&job.id).await, Err(EngineError::Core(CoreError::NotFound { .. })));
    assert!(h.engine.registry().is_empty().await);
}
