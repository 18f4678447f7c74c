//! Frame-level video decode/encode seams used by the job runner.

use std::path::Path;

use async_trait::async_trait;
use image::RgbImage;

/// Stream properties of a decoded video.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Frame count from container metadata. `None` when the container does
    /// not say; the runner then counts frames as it decodes them.
    pub frame_count: Option<u64>,
}

/// Ordered frames of one input video.
#[async_trait]
pub trait FrameSource: Send {
    fn info(&self) -> &VideoInfo;

    /// Next frame in presentation order, `None` once the stream is exhausted.
    async fn next_frame(&mut self) -> Result<Option<RgbImage>, MediaError>;
}

/// Encoder for one output video.
#[async_trait]
pub trait FrameSink: Send {
    async fn write_frame(&mut self, frame: &RgbImage) -> Result<(), MediaError>;

    /// Flush and close the container. Dropping a sink without finishing
    /// abandons the output.
    async fn finish(self: Box<Self>) -> Result<(), MediaError>;
}

#[async_trait]
pub trait MediaBackend: Send + Sync {
    async fn open(&self, input: &Path) -> Result<Box<dyn FrameSource>, MediaError>;

    /// Create an encoder writing to `output`. The audio track, if any, is
    /// copied from `audio_from`.
    async fn create(
        &self,
        output: &Path,
        info: &VideoInfo,
        audio_from: &Path,
    ) -> Result<Box<dyn FrameSink>, MediaError>;
}

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("Could not open target video: {0}")]
    Open(String),

    #[error("Video decode failed: {0}")]
    Decode(String),

    #[error("Video encode failed: {0}")]
    Encode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
