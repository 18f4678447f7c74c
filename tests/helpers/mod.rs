//! Test doubles and helpers shared by the integration tests.
//!
//! `FakeEngine` treats a frame as containing a face when its top-left pixel
//! is [`FACE`], fails with a model error on [`BROKEN`], and fills swapped
//! frames with [`SWAPPED`]. `FakeMedia` serves a fixed list of frames and
//! records what each job writes.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use image::{ImageFormat, Rgb, RgbImage};
use parking_lot::Mutex;
use tower::ServiceExt;
use uuid::Uuid;

use faceswap_api::app_state::AppState;
use faceswap_api::config::AppConfig;
use faceswap_api::models::job::{Job, SwapOptions};
use faceswap_api::services::engine::{
    EngineError, ExecutionProvider, FaceSwapEngine, SourceFace,
};
use faceswap_api::services::job_store::JobStore;
use faceswap_api::services::media::{
    FrameSink, FrameSource, MediaBackend, MediaError, VideoInfo,
};
use faceswap_api::services::storage::Storage;

pub const FACE: Rgb<u8> = Rgb([255, 0, 0]);
pub const NO_FACE: Rgb<u8> = Rgb([10, 10, 10]);
pub const BROKEN: Rgb<u8> = Rgb([0, 0, 255]);
pub const SWAPPED: Rgb<u8> = Rgb([0, 255, 0]);

pub const WIDTH: u32 = 4;
pub const HEIGHT: u32 = 4;

pub fn frame(color: Rgb<u8>) -> RgbImage {
    RgbImage::from_pixel(WIDTH, HEIGHT, color)
}

/// `faces` frames with a face followed by `blank` frames without one.
pub fn frames(faces: usize, blank: usize) -> Vec<RgbImage> {
    std::iter::repeat_with(|| frame(FACE))
        .take(faces)
        .chain(std::iter::repeat_with(|| frame(NO_FACE)).take(blank))
        .collect()
}

pub fn png(color: Rgb<u8>) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    frame(color).write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

pub fn source_face() -> SourceFace {
    SourceFace {
        embedding: vec![0.5; 8],
        bbox: [0.0, 0.0, WIDTH as f32, HEIGHT as f32],
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct FakeEngine {
    ready: AtomicBool,
    delay: Duration,
    pub swaps: AtomicUsize,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            ready: AtomicBool::new(true),
            delay,
            swaps: AtomicUsize::new(0),
        }
    }

    pub fn not_ready() -> Self {
        let engine = Self::new();
        engine.ready.store(false, Ordering::SeqCst);
        engine
    }
}

#[async_trait]
impl FaceSwapEngine for FakeEngine {
    async fn analyse_source(&self, image: &RgbImage) -> Result<SourceFace, EngineError> {
        if *image.get_pixel(0, 0) == FACE {
            Ok(source_face())
        } else {
            Err(EngineError::NoFaceDetected)
        }
    }

    async fn swap(
        &self,
        _source: &SourceFace,
        frame: &RgbImage,
        _options: SwapOptions,
    ) -> Result<RgbImage, EngineError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.swaps.fetch_add(1, Ordering::SeqCst);
        match *frame.get_pixel(0, 0) {
            p if p == FACE => Ok(RgbImage::from_pixel(frame.width(), frame.height(), SWAPPED)),
            p if p == BROKEN => Err(EngineError::ModelFailure("tensor shape mismatch".into())),
            _ => Err(EngineError::NoFaceDetected),
        }
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Media
// ---------------------------------------------------------------------------

pub struct FakeMedia {
    frames: Vec<RgbImage>,
    report_count: bool,
    fail_decode_at: Option<usize>,
    written: Arc<Mutex<HashMap<PathBuf, Vec<RgbImage>>>>,
}

impl FakeMedia {
    /// Container metadata reports the frame count up front.
    pub fn new(frames: Vec<RgbImage>) -> Self {
        Self {
            frames,
            report_count: true,
            fail_decode_at: None,
            written: Arc::default(),
        }
    }

    /// Container metadata has no frame count.
    pub fn without_count(frames: Vec<RgbImage>) -> Self {
        Self {
            report_count: false,
            ..Self::new(frames)
        }
    }

    pub fn failing_at(frames: Vec<RgbImage>, index: usize) -> Self {
        Self {
            fail_decode_at: Some(index),
            ..Self::new(frames)
        }
    }

    /// Frames encoded into `output`, if its sink was finished.
    pub fn written(&self, output: &Path) -> Option<Vec<RgbImage>> {
        self.written.lock().get(output).cloned()
    }
}

#[async_trait]
impl MediaBackend for FakeMedia {
    async fn open(&self, input: &Path) -> Result<Box<dyn FrameSource>, MediaError> {
        if !input.exists() {
            return Err(MediaError::Open(format!("{} does not exist", input.display())));
        }
        Ok(Box::new(FakeSource {
            info: VideoInfo {
                width: WIDTH,
                height: HEIGHT,
                fps: 25.0,
                frame_count: self.report_count.then_some(self.frames.len() as u64),
            },
            frames: self.frames.clone(),
            next: 0,
            fail_at: self.fail_decode_at,
        }))
    }

    async fn create(
        &self,
        output: &Path,
        _info: &VideoInfo,
        _audio_from: &Path,
    ) -> Result<Box<dyn FrameSink>, MediaError> {
        Ok(Box::new(FakeSink {
            output: output.to_path_buf(),
            frames: Vec::new(),
            written: self.written.clone(),
        }))
    }
}

struct FakeSource {
    info: VideoInfo,
    frames: Vec<RgbImage>,
    next: usize,
    fail_at: Option<usize>,
}

#[async_trait]
impl FrameSource for FakeSource {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    async fn next_frame(&mut self) -> Result<Option<RgbImage>, MediaError> {
        if self.fail_at == Some(self.next) {
            return Err(MediaError::Decode("corrupt packet".into()));
        }
        let frame = self.frames.get(self.next).cloned();
        self.next += 1;
        tokio::task::yield_now().await;
        Ok(frame)
    }
}

struct FakeSink {
    output: PathBuf,
    frames: Vec<RgbImage>,
    written: Arc<Mutex<HashMap<PathBuf, Vec<RgbImage>>>>,
}

#[async_trait]
impl FrameSink for FakeSink {
    async fn write_frame(&mut self, frame: &RgbImage) -> Result<(), MediaError> {
        self.frames.push(frame.clone());
        // Leave a partial file behind like a real encoder would.
        tokio::fs::write(&self.output, b"partial").await?;
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<(), MediaError> {
        let body = format!("fake-mp4:{}", self.frames.len());
        tokio::fs::write(&self.output, body).await?;
        self.written.lock().insert(self.output, self.frames);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// State and HTTP
// ---------------------------------------------------------------------------

pub fn test_config(storage: &Path) -> AppConfig {
    AppConfig {
        storage_path: storage.to_path_buf(),
        max_concurrent_jobs: 2,
        max_image_bytes: 64 * 1024,
        max_video_bytes: 256 * 1024,
        ..AppConfig::default()
    }
}

pub fn build_state(
    config: AppConfig,
    engine: Arc<dyn FaceSwapEngine>,
    media: Arc<dyn MediaBackend>,
) -> AppState {
    let jobs = JobStore::new(Storage::new(&config.storage_path), config.max_concurrent_jobs);
    AppState::new(config, jobs, engine, media, vec![ExecutionProvider::Cpu])
}

/// Write a placeholder upload where the runner expects the job's input.
pub async fn stage_input(store: &JobStore, job_id: Uuid) -> PathBuf {
    let ws = store.workspace(job_id);
    ws.create().await.unwrap();
    let input = ws.input_path("mp4");
    tokio::fs::write(&input, b"video-bytes").await.unwrap();
    input
}

/// Poll until the job reaches `done` or `failed`.
pub async fn wait_for_terminal(store: &JobStore, job_id: Uuid) -> Job {
    for _ in 0..1000 {
        let job = store.get(job_id).expect("job disappeared while waiting");
        if job.status.is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {job_id} did not finish in time");
}

pub struct Part<'a> {
    pub name: &'a str,
    pub file_name: &'a str,
    pub content_type: &'a str,
    pub data: Vec<u8>,
}

const BOUNDARY: &str = "faceswap-test-boundary";

pub fn multipart_request(uri: &str, parts: Vec<Part<'_>>) -> Request<Body> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                part.name, part.file_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", part.content_type).as_bytes());
        body.extend_from_slice(&part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

pub fn image_part<'a>(name: &'a str, data: Vec<u8>) -> Part<'a> {
    Part {
        name,
        file_name: "face.png",
        content_type: "image/png",
        data,
    }
}

pub fn video_part(data: Vec<u8>) -> Part<'static> {
    Part {
        name: "target",
        file_name: "clip.mp4",
        content_type: "video/mp4",
        data,
    }
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    send(app, Request::get(uri).body(Body::empty()).unwrap()).await
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
