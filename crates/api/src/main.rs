use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sdjobs_api::background::job_retention;
use sdjobs_api::config::ServerConfig;
use sdjobs_api::router::build_app_router;
use sdjobs_api::state::AppState;
use sdjobs_events::{JobEventBus, LogBuffer};
use sdjobs_worker::{JobEngine, RunnerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|f| f == "json");
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "sdjobs_api=debug,sdjobs_worker=debug,sdjobs_db=info,tower_http=debug".into()
            }),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(|| tracing_subscriber::fmt::layer()))
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    let runner_config = RunnerConfig::from_env();
    tracing::info!(
        executable = %runner_config.executable.display(),
        models_dir = %runner_config.models_dir.display(),
        output_dir = %runner_config.output_dir.display(),
        "Loaded runner configuration"
    );

    // --- Database ---
    let pool = sdjobs_db::create_pool(&config.database_url)
        .await
        .with_context(|| format!("Failed to open database {}", config.database_url))?;

    sdjobs_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    tracing::info!("Database health check passed");

    // --- Job engine ---
    let event_bus = Arc::new(JobEventBus::default());
    let log_buffer = Arc::new(LogBuffer::new());
    let engine = JobEngine::new(
        pool.clone(),
        runner_config,
        Arc::clone(&event_bus),
        Arc::clone(&log_buffer),
    );
    engine
        .reconcile()
        .await
        .context("Failed to reconcile jobs from a previous run")?;

    // --- Retention ---
    let retention_cancel = CancellationToken::new();
    let retention_handle = tokio::spawn(job_retention::run(
        pool.clone(),
        config.job_retention_days,
        retention_cancel.clone(),
    ));

    // --- App state ---
    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        engine: engine.clone(),
        event_bus,
        log_buffer,
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().context("Invalid HOST address")?,
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    if tokio::time::timeout(Duration::from_secs(10), engine.shutdown())
        .await
        .is_err()
    {
        tracing::warn!("Timed out waiting for job runners");
    }
    tracing::info!("Job engine shut down");

    retention_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), retention_handle).await;
    tracing::info!("Retention task stopped");

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
