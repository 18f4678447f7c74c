use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::services::engine::EngineError;
use crate::services::job_store::JobError;

/// Error type for HTTP handlers. Renders as `{"error": ..., "code": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Bad, oversized or undecodable input, rejected before any job exists.
    #[error("{0}")]
    Validation(String),

    /// A required face was not found in an uploaded image.
    #[error("{0}")]
    NoFace(String),

    /// A job id that is not even well-formed.
    #[error("Job {0} not found")]
    UnknownJob(String),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            ApiError::NoFace(msg) => (StatusCode::BAD_REQUEST, "NO_FACE_DETECTED", msg.clone()),
            ApiError::UnknownJob(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),

            ApiError::Job(err) => match err {
                JobError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string()),
                JobError::NotReady { .. } => (StatusCode::CONFLICT, "NOT_READY", err.to_string()),
                JobError::Gone(_) => (StatusCode::GONE, "GONE", err.to_string()),
                JobError::ResourceExhausted { .. } => (
                    StatusCode::TOO_MANY_REQUESTS,
                    "RESOURCE_EXHAUSTED",
                    err.to_string(),
                ),
                JobError::Finalized(_) | JobError::ArtifactMissing(_) | JobError::Io(_) => {
                    tracing::error!(error = %err, "Job store error");
                    internal()
                }
            },

            ApiError::Engine(err) => match err {
                EngineError::NoFaceDetected => (
                    StatusCode::BAD_REQUEST,
                    "NO_FACE_DETECTED",
                    "No face detected in target image".to_string(),
                ),
                EngineError::ModelFailure(msg) => {
                    tracing::error!(error = %msg, "Face swap failed");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "MODEL_FAILURE",
                        "Face swap failed".to_string(),
                    )
                }
            },

            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                internal()
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn status_of(err: impl Into<ApiError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn test_job_errors_map_to_distinct_statuses() {
        let id = Uuid::new_v4();
        assert_eq!(status_of(JobError::NotFound(id)), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(JobError::NotReady {
                job_id: id,
                status: crate::models::job::JobStatus::Processing,
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(status_of(JobError::Gone(id)), StatusCode::GONE);
        assert_eq!(
            status_of(JobError::ResourceExhausted { limit: 2 }),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status_of(JobError::ArtifactMissing(id)),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_engine_errors() {
        assert_eq!(status_of(EngineError::NoFaceDetected), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(EngineError::ModelFailure("oom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(ApiError::Validation("too big".into())),
            StatusCode::BAD_REQUEST
        );
    }
}
