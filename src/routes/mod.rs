use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

pub mod health;
pub mod jobs;
pub mod metrics;
pub mod swap;

/// API routes with their middleware. `/metrics` is attached separately
/// because it carries its own state.
pub fn router(state: AppState) -> Router {
    let body_limit = state.config.max_request_bytes();

    Router::new()
        .route("/health", get(health::health_check))
        .route("/swap", post(swap::swap_image))
        .route("/swap/video", post(swap::submit_video))
        .route("/job/{job_id}", get(jobs::job_status))
        .route("/job/{job_id}/download", get(jobs::download_result))
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
}
