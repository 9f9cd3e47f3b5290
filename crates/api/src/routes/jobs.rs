//! Route definitions for the `/jobs` resource.

use axum::routing::{delete, get, post};
use axum::Router;

use crate::handlers::{jobs, stream};
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// GET    /?type=                       -> list_jobs
/// POST   /                             -> submit_job
/// DELETE /artifacts?type=&reference=   -> delete_artifact_jobs
/// GET    /{id}                         -> stream::stream_job (SSE)
/// GET    /{id}/status                  -> get_job_status
/// POST   /{id}/stop                    -> stop_job
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(jobs::list_jobs).post(jobs::submit_job))
        .route("/artifacts", delete(jobs::delete_artifact_jobs))
        .route("/{id}", get(stream::stream_job))
        .route("/{id}/status", get(jobs::get_job_status))
        .route("/{id}/stop", post(jobs::stop_job))
}
