use std::sync::Arc;

use sdjobs_events::{JobEventBus, LogBuffer};
use sdjobs_worker::JobEngine;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: sdjobs_db::DbPool,
    pub config: Arc<ServerConfig>,
    /// Runs jobs and owns their processes.
    pub engine: JobEngine,
    /// Live job output and outcomes, shared with the engine.
    pub event_bus: Arc<JobEventBus>,
    /// Captured output history, shared with the engine.
    pub log_buffer: Arc<LogBuffer>,
}
