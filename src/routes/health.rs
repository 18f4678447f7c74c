use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;
use crate::services::engine::ExecutionProvider;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub execution_providers: Vec<ExecutionProvider>,
    pub engine: EngineHealth,
    pub jobs: JobsHealth,
}

#[derive(Serialize)]
pub struct EngineHealth {
    pub ready: bool,
}

#[derive(Serialize)]
pub struct JobsHealth {
    pub active: usize,
    pub max_concurrent: usize,
}

/// GET /health: model readiness and job capacity.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let ready = state.is_engine_ready();
    let status_code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if ready { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        execution_providers: state.execution_providers.as_ref().clone(),
        engine: EngineHealth { ready },
        jobs: JobsHealth {
            active: state.jobs.active_count(),
            max_concurrent: state.config.max_concurrent_jobs,
        },
    };

    (status_code, Json(response))
}
