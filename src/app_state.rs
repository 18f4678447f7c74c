use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::{
    engine::{ExecutionProvider, FaceSwapEngine},
    job_store::JobStore,
    media::MediaBackend,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub jobs: Arc<JobStore>,
    pub engine: Arc<dyn FaceSwapEngine>,
    pub media: Arc<dyn MediaBackend>,
    pub execution_providers: Arc<Vec<ExecutionProvider>>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        jobs: JobStore,
        engine: Arc<dyn FaceSwapEngine>,
        media: Arc<dyn MediaBackend>,
        execution_providers: Vec<ExecutionProvider>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            jobs: Arc::new(jobs),
            engine,
            media,
            execution_providers: Arc::new(execution_providers),
        }
    }

    /// Whether the inference models are loaded and usable.
    pub fn is_engine_ready(&self) -> bool {
        self.engine.is_ready()
    }
}
