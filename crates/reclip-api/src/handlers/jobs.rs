//! Job submission and status handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use reclip_models::{ConcatParams, Job, JobId, JobStatus, JobType, Progress, Summary, UgcParams};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: String,
}

/// Public view of a job record. Parameters stay server-side since they may
/// carry a caption credential.
#[derive(Debug, Serialize)]
pub struct JobView {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: JobStatus,
    pub progress: Progress,
    pub summary: Summary,
    pub outputs: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            id: job.id.0,
            job_type: job.job_type,
            status: job.status,
            progress: job.progress,
            summary: job.summary,
            outputs: job.outputs,
            created_at: job.created_at,
            updated_at: job.updated_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    /// Only the last N lines
    #[serde(default)]
    pub tail: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    /// Newline-joined lines, each terminated by `\n`
    pub logs: String,
}

/// Malformed or incomplete JSON bodies are validation errors, not 422s.
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::validation(rejection.body_text()))
}

/// POST /api/jobs/concat
pub async fn submit_concat(
    State(state): State<AppState>,
    payload: Result<Json<ConcatParams>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let job = state.service.submit_concat(body(payload)?).await?;
    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { job_id: job.id.0 })))
}

/// POST /api/jobs/ugc
pub async fn submit_ugc(
    State(state): State<AppState>,
    payload: Result<Json<UgcParams>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let job = state.service.submit_ugc(body(payload)?).await?;
    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { job_id: job.id.0 })))
}

/// GET /api/jobs/:id
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobView>> {
    let job = state.service.get_job(&JobId::from_string(job_id)).await?;
    Ok(Json(job.into()))
}

/// GET /api/jobs/:id/logs?tail=N
pub async fn get_job_logs(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Json<LogsResponse>> {
    let logs = state
        .service
        .get_logs(&JobId::from_string(job_id), query.tail)
        .await?;
    Ok(Json(LogsResponse { logs }))
}
