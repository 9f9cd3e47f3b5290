//! `GET /health`: liveness of the job store and the engine.

use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `ok`, `degraded` (job store unreachable) or `draining` (shutting down).
    pub status: &'static str,
    pub version: &'static str,
    pub db_healthy: bool,
    /// Jobs with a live process right now.
    pub active_jobs: usize,
    pub accepting_jobs: bool,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_healthy = sdjobs_db::health_check(&state.pool).await.is_ok();
    let accepting_jobs = state.engine.is_accepting();

    let status = match (db_healthy, accepting_jobs) {
        (false, _) => "degraded",
        (true, false) => "draining",
        (true, true) => "ok",
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        db_healthy,
        active_jobs: state.engine.registry().len().await,
        accepting_jobs,
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
