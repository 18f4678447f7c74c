//! Face-swap inference capability.
//!
//! The detection, swap and enhancement models sit behind [`FaceSwapEngine`].
//! One engine instance is built at startup and shared, via `Arc`, by the
//! synchronous image handler and every video job runner, so implementations
//! must tolerate concurrent calls. Wrap an engine in [`SerializedEngine`] when
//! the backing model cannot.

use async_trait::async_trait;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::sync::Mutex;

use crate::models::job::SwapOptions;

/// Identity embedding of the face that gets swapped into target frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceFace {
    pub embedding: Vec<f32>,
    /// Bounding box as `[x1, y1, x2, y2]` in source image pixels.
    pub bbox: [f32; 4],
}

#[async_trait]
pub trait FaceSwapEngine: Send + Sync {
    /// Detect the most prominent face in `image` and return its embedding.
    async fn analyse_source(&self, image: &RgbImage) -> Result<SourceFace, EngineError>;

    /// Swap `source` into `frame`, returning a new frame of the same size.
    ///
    /// Fails with [`EngineError::NoFaceDetected`] when the frame has no face
    /// to replace; callers decide whether that is fatal.
    async fn swap(
        &self,
        source: &SourceFace,
        frame: &RgbImage,
        options: SwapOptions,
    ) -> Result<RgbImage, EngineError>;

    /// Whether the required models are loaded.
    fn is_ready(&self) -> bool;
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("No face detected")]
    NoFaceDetected,

    #[error("Model failure: {0}")]
    ModelFailure(String),
}

/// Runs every inference call of the wrapped engine under one async lock.
pub struct SerializedEngine<E> {
    inner: E,
    lock: Mutex<()>,
}

impl<E> SerializedEngine<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl<E: FaceSwapEngine> FaceSwapEngine for SerializedEngine<E> {
    async fn analyse_source(&self, image: &RgbImage) -> Result<SourceFace, EngineError> {
        let _guard = self.lock.lock().await;
        self.inner.analyse_source(image).await
    }

    async fn swap(
        &self,
        source: &SourceFace,
        frame: &RgbImage,
        options: SwapOptions,
    ) -> Result<RgbImage, EngineError> {
        let _guard = self.lock.lock().await;
        self.inner.swap(source, frame, options).await
    }

    fn is_ready(&self) -> bool {
        self.inner.is_ready()
    }
}

/// Accelerator backends the inference runtime may use, in ONNX Runtime naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum ExecutionProvider {
    #[strum(serialize = "CPUExecutionProvider")]
    #[serde(rename = "CPUExecutionProvider")]
    Cpu,
    #[strum(serialize = "CoreMLExecutionProvider")]
    #[serde(rename = "CoreMLExecutionProvider")]
    CoreMl,
    #[strum(serialize = "CUDAExecutionProvider")]
    #[serde(rename = "CUDAExecutionProvider")]
    Cuda,
    #[strum(serialize = "DirectMLExecutionProvider")]
    #[serde(rename = "DirectMLExecutionProvider")]
    DirectMl,
}

impl ExecutionProvider {
    /// Resolve the provider list once at startup.
    ///
    /// An explicit comma-separated list wins; otherwise Apple Silicon gets
    /// CoreML with a CPU fallback and everything else runs on CPU.
    pub fn resolve(configured: Option<&str>) -> Result<Vec<Self>, strum::ParseError> {
        match configured.map(str::trim).filter(|s| !s.is_empty()) {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|name| name.parse::<Self>())
                .collect(),
            None => Ok(Self::platform_default()),
        }
    }

    fn platform_default() -> Vec<Self> {
        if cfg!(all(target_os = "macos", target_arch = "aarch64")) {
            vec![Self::CoreMl, Self::Cpu]
        } else {
            vec![Self::Cpu]
        }
    }
}
