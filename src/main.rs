use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

use faceswap_api::app_state::AppState;
use faceswap_api::config::AppConfig;
use faceswap_api::routes;
use faceswap_api::services::{
    engine::{ExecutionProvider, FaceSwapEngine, SerializedEngine},
    ffmpeg::FfmpegBackend,
    inference::InferenceClient,
    job_store::JobStore,
    retention,
    storage::Storage,
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing faceswap-api server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe();

    let providers = ExecutionProvider::resolve(config.execution_providers.as_deref())
        .expect("Invalid EXECUTION_PROVIDERS");
    tracing::info!(providers = ?providers, "Resolved execution providers");

    // Connect to the inference sidecar and load models
    let inference = InferenceClient::new(
        &config.inference_url,
        providers.clone(),
        config.inference_timeout(),
    )
    .expect("Failed to initialize inference client");
    match inference.load().await {
        Ok(()) => tracing::info!(url = %config.inference_url, "Face swap models loaded"),
        Err(e) => tracing::warn!(
            url = %config.inference_url,
            error = %e,
            "Face swap models not loaded, serving in degraded mode"
        ),
    }
    let engine: Arc<dyn FaceSwapEngine> = if config.serialize_inference {
        tracing::info!("Serializing inference calls");
        Arc::new(SerializedEngine::new(inference))
    } else {
        Arc::new(inference)
    };

    let media = Arc::new(FfmpegBackend::new(&config.ffmpeg_path, &config.ffprobe_path));

    // Prepare job storage, clearing anything a previous process left behind
    let storage = Storage::new(&config.storage_path);
    tokio::fs::create_dir_all(storage.root())
        .await
        .expect("Failed to create job storage directory");
    let jobs = JobStore::new(storage, config.max_concurrent_jobs);
    match jobs.reap_orphans().await {
        Ok(0) => {}
        Ok(n) => tracing::info!(removed = n, "Removed leftover job directories"),
        Err(e) => tracing::warn!(error = %e, "Failed to sweep job storage on startup"),
    }

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(config, jobs, engine, media, providers);

    let sweeper = retention::spawn_sweeper(
        state.jobs.clone(),
        state.config.job_ttl(),
        state.config.sweep_interval(),
    );

    let app = routes::router(state.clone()).merge(
        Router::new()
            .route("/metrics", get(routes::metrics::prometheus_metrics))
            .with_state(prometheus_handle),
    );

    tracing::info!("Starting faceswap-api on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    sweeper.abort();
    let purged = state.jobs.purge_all().await;
    tracing::info!(purged, "Shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
