//! Handlers for the `/jobs` resource.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use sdjobs_core::job::{JobType, SubmitJob};
use sdjobs_core::types::JobId;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// Query parameters for `GET /jobs`.
#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    #[serde(rename = "type")]
    pub job_type: JobType,
}

/// Query parameters for `DELETE /jobs/artifacts`.
#[derive(Debug, Deserialize)]
pub struct ArtifactQuery {
    #[serde(rename = "type")]
    pub job_type: JobType,
    /// Artifact path or file name, matched against stored results.
    pub reference: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: JobId,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: u64,
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /jobs
///
/// Validate the request, create a pending job and start it in the
/// background. Returns 202 with the new job's id.
pub async fn submit_job(
    State(state): State<AppState>,
    payload: Result<Json<SubmitJob>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(request) = payload?;
    let job = state.engine.submit(request).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: SubmitResponse { job_id: job.id },
        }),
    ))
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// GET /jobs?type=generate
///
/// Jobs of one type, newest first.
pub async fn list_jobs(
    State(state): State<AppState>,
    query: Result<Query<ListJobsQuery>, QueryRejection>,
) -> AppResult<impl IntoResponse> {
    let Query(params) = query?;
    let jobs = state.engine.list(params.job_type).await?;
    Ok(Json(DataResponse { data: jobs }))
}

/// GET /jobs/{id}/status
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = state.engine.get(&job_id).await?;
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// Stop
// ---------------------------------------------------------------------------

/// POST /jobs/{id}/stop
///
/// Cancel the job whatever its state. Returns 204.
pub async fn stop_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<StatusCode> {
    state.engine.stop_job(&job_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

/// DELETE /jobs/artifacts?type=generate&reference=outputs/x.png
///
/// Remove the jobs whose result references a deleted artifact.
pub async fn delete_artifact_jobs(
    State(state): State<AppState>,
    query: Result<Query<ArtifactQuery>, QueryRejection>,
) -> AppResult<impl IntoResponse> {
    let Query(params) = query?;
    let deleted = state
        .engine
        .forget_artifact(params.job_type, &params.reference)
        .await?;
    Ok(Json(DataResponse {
        data: DeleteResponse { deleted },
    }))
}
