#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use sdjobs_api::config::ServerConfig;
use sdjobs_api::router::build_app_router;
use sdjobs_api::state::AppState;
use sdjobs_core::job::JobStatus;
use sdjobs_events::{JobEventBus, LogBuffer};
use sdjobs_worker::{JobEngine, RunnerConfig};
use tempfile::TempDir;
use tower::ServiceExt;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        database_url: "sqlite::memory:".to_string(),
        job_retention_days: 30,
    }
}

/// A router over an in-memory database and a fake executable.
///
/// The temp dir holds the executable and every resource directory; keep it
/// alive for the duration of the test.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub dir: TempDir,
}

impl TestApp {
    /// A fresh clone of the router for one `oneshot` request.
    pub fn app(&self) -> Router {
        self.router.clone()
    }

    /// Poll the job's status until it leaves the active states.
    pub async fn wait_terminal(&self, job_id: &str) -> JobStatus {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let job = self.state.engine.get(job_id).await.unwrap();
                if job.status.is_terminal() {
                    return job.status;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("job should finish")
    }

    /// Poll until at least `count` output entries are buffered for the job.
    pub async fn wait_logs(&self, job_id: &str, count: usize) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while self.state.log_buffer.len(job_id) < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("job should produce output")
    }

    /// Poll until the job's process is running.
    pub async fn wait_running(&self, job_id: &str) {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let job = self.state.engine.get(job_id).await.unwrap();
                if job.status == JobStatus::Running {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("job should start")
    }
}

/// Knobs for tests that need a non-default engine.
pub struct TestOptions {
    pub stderr_watchdog: Duration,
    pub bus_capacity: usize,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            stderr_watchdog: Duration::from_millis(200),
            bus_capacity: 1024,
        }
    }
}

/// Build the full application, with `script_body` standing in for the
/// stable-diffusion executable.
pub async fn build_test_app(script_body: &str) -> TestApp {
    build_test_app_with(script_body, TestOptions::default()).await
}

pub async fn build_test_app_with(script_body: &str, options: TestOptions) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("fake-sd.sh");
    std::fs::write(&script, format!("#!/bin/sh\n{script_body}\n")).unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let runner_config = RunnerConfig {
        executable: script,
        working_dir: dir.path().to_path_buf(),
        output_dir: dir.path().join("outputs"),
        models_dir: dir.path().join("models"),
        stderr_watchdog: options.stderr_watchdog,
        kill_grace: Duration::from_millis(500),
    };

    let config = test_config();
    let pool = sdjobs_db::create_in_memory_pool().await.unwrap();
    let event_bus = Arc::new(JobEventBus::new(options.bus_capacity));
    let log_buffer = Arc::new(LogBuffer::new());
    let engine = JobEngine::new(
        pool.clone(),
        runner_config,
        Arc::clone(&event_bus),
        Arc::clone(&log_buffer),
    );

    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        engine,
        event_bus,
        log_buffer,
    };
    let router = build_app_router(state.clone(), &config);

    TestApp { router, state, dir }
}

/// Minimal valid `generate` submission.
pub fn generate_body() -> serde_json::Value {
    serde_json::json!({
        "type": "generate",
        "params": {
            "model": "sd15.gguf",
            "prompt": "a lighthouse at dusk",
            "seed": 42
        }
    })
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

/// Send a GET request to the given URI and return the response.
pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// Send a POST request with a JSON body.
pub async fn post_json(app: Router, uri: &str, json: serde_json::Value) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(json.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// Send a POST request with a raw body.
pub async fn post_raw(app: Router, uri: &str, body: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// Send a bodiless POST request.
pub async fn post(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// Send a DELETE request to the given URI and return the response.
pub async fn delete(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::DELETE)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Collect a response body as text. For SSE this waits for the stream to end.
pub async fn body_text(response: Response<Body>) -> String {
    let bytes = tokio::time::timeout(Duration::from_secs(10), response.into_body().collect())
        .await
        .expect("body should end")
        .unwrap()
        .to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Submit a job and return its id.
pub async fn submit(app: &TestApp, body: serde_json::Value) -> String {
    let response = post_json(app.app(), "/jobs", body).await;
    assert_eq!(response.status(), axum::http::StatusCode::ACCEPTED);
    let json = body_json(response).await;
    json["data"]["jobId"].as_str().unwrap().to_string()
}

/// Parse an SSE body into `(event, data)` pairs, skipping keep-alive comments.
pub fn sse_events(body: &str) -> Vec<(String, String)> {
    body.split("\n\n")
        .filter_map(|block| {
            let mut event = None;
            let mut data = Vec::new();
            for line in block.lines() {
                if let Some(name) = line.strip_prefix("event:") {
                    event = Some(name.trim_start().to_string());
                } else if let Some(d) = line.strip_prefix("data:") {
                    data.push(d.strip_prefix(' ').unwrap_or(d));
                }
            }
            event.map(|e| (e, data.join("\n")))
        })
        .collect()
}
