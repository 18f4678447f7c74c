use std::path::PathBuf;
use std::time::Duration;

use garde::Validate;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8000").
    #[serde(default = "default_bind_addr")]
    #[garde(length(min = 1))]
    pub bind_addr: String,

    /// Root directory holding one sub-directory per job.
    #[serde(default = "default_storage_path")]
    #[garde(skip)]
    pub storage_path: PathBuf,

    /// Base URL of the face-swap inference sidecar.
    #[serde(default = "default_inference_url")]
    #[garde(length(min = 1))]
    pub inference_url: String,

    /// Per-request timeout for inference calls, in seconds.
    #[serde(default = "default_inference_timeout_secs")]
    #[garde(range(min = 1))]
    pub inference_timeout_secs: u64,

    /// Serialize all inference calls behind a single lock.
    #[serde(default)]
    #[garde(skip)]
    pub serialize_inference: bool,

    /// Comma-separated execution providers; platform default when unset.
    #[serde(default)]
    #[garde(skip)]
    pub execution_providers: Option<String>,

    #[serde(default = "default_ffmpeg_path")]
    #[garde(length(min = 1))]
    pub ffmpeg_path: String,

    #[serde(default = "default_ffprobe_path")]
    #[garde(length(min = 1))]
    pub ffprobe_path: String,

    /// Maximum number of queued or processing video jobs.
    #[serde(default = "default_max_concurrent_jobs")]
    #[garde(range(min = 1))]
    pub max_concurrent_jobs: usize,

    /// Seconds a finished (or stalled) job is retained before it is purged.
    #[serde(default = "default_job_ttl_secs")]
    #[garde(range(min = 1))]
    pub job_ttl_secs: u64,

    /// Seconds between retention sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    #[garde(range(min = 1))]
    pub sweep_interval_secs: u64,

    /// Upload limit for source/target images.
    #[serde(default = "default_max_image_bytes")]
    #[garde(range(min = 1))]
    pub max_image_bytes: usize,

    /// Upload limit for target videos.
    #[serde(default = "default_max_video_bytes")]
    #[garde(range(min = 1))]
    pub max_video_bytes: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./data/jobs")
}

fn default_inference_url() -> String {
    "http://127.0.0.1:8100".to_string()
}

fn default_inference_timeout_secs() -> u64 {
    120
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}

fn default_max_concurrent_jobs() -> usize {
    4
}

fn default_job_ttl_secs() -> u64 {
    600
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_max_image_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_max_video_bytes() -> usize {
    100 * 1024 * 1024
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            storage_path: default_storage_path(),
            inference_url: default_inference_url(),
            inference_timeout_secs: default_inference_timeout_secs(),
            serialize_inference: false,
            execution_providers: None,
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            job_ttl_secs: default_job_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_image_bytes: default_max_image_bytes(),
            max_video_bytes: default_max_video_bytes(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn job_ttl(&self) -> Duration {
        Duration::from_secs(self.job_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_secs)
    }

    /// Largest request body the router accepts: one video plus one image,
    /// with headroom for multipart framing.
    pub fn max_request_bytes(&self) -> usize {
        self.max_video_bytes + self.max_image_bytes + 64 * 1024
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] garde::Report),
}
