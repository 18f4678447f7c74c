use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::{ApiError, ApiResult};
use crate::models::job::JobStatusResponse;

/// GET /job/{job_id}: progress of a video job.
pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusResponse>> {
    let job_id = parse_job_id(&job_id)?;
    let job = state.jobs.get(job_id)?;
    Ok(Json(JobStatusResponse::from(&job)))
}

/// GET /job/{job_id}/download: the finished video. The job and its files
/// are removed once the result has been read.
pub async fn download_result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Response> {
    let job_id = parse_job_id(&job_id)?;
    let artifact = state.jobs.take_result(job_id).await?;

    let content_type = artifact.media_type().to_string();
    let disposition = format!("attachment; filename={}", artifact.file_name());
    let bytes = artifact.into_bytes().await?;

    tracing::info!(job_id = %job_id, bytes = bytes.len(), "Result downloaded, job purged");

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

fn parse_job_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::UnknownJob(raw.to_string()))
}
