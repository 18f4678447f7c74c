use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;

/// GET /metrics: Prometheus text exposition of job and swap counters.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
}

/// Register descriptions for every series the service emits.
pub fn describe() {
    metrics::describe_counter!("video_jobs_submitted_total", "Video jobs accepted");
    metrics::describe_counter!(
        "video_jobs_rejected_total",
        "Video submissions rejected because too many jobs were in flight"
    );
    metrics::describe_counter!("video_jobs_completed_total", "Video jobs that reached done");
    metrics::describe_counter!("video_jobs_failed_total", "Video jobs that reached failed");
    metrics::describe_counter!("video_frames_processed_total", "Frames written by job runners");
    metrics::describe_counter!(
        "video_frames_passthrough_total",
        "Frames passed through unmodified because no face was found"
    );
    metrics::describe_histogram!(
        "video_job_processing_seconds",
        "Wall time from job start to completion"
    );
    metrics::describe_gauge!("video_jobs_active", "Queued or processing video jobs");
    metrics::describe_counter!("image_swaps_total", "Successful single-image swaps");
    metrics::describe_counter!("jobs_purged_total", "Job records removed by purge or retention");
}
