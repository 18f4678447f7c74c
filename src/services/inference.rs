use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use image::{ImageFormat, RgbImage};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::models::job::SwapOptions;
use crate::services::engine::{EngineError, ExecutionProvider, FaceSwapEngine, SourceFace};

/// Client for the face-swap inference sidecar that hosts the detection,
/// swap and enhancement models.
pub struct InferenceClient {
    http: Client,
    base_url: String,
    providers: Vec<ExecutionProvider>,
    ready: AtomicBool,
}

#[derive(Serialize)]
struct LoadRequest<'a> {
    execution_providers: &'a [ExecutionProvider],
}

#[derive(Serialize)]
struct AnalyseRequest {
    image: String,
}

#[derive(Deserialize)]
struct AnalyseResponse {
    faces: Vec<SourceFace>,
}

#[derive(Serialize)]
struct SwapRequest<'a> {
    source: &'a SourceFace,
    frame: String,
    many_faces: bool,
    enhance: bool,
}

#[derive(Deserialize)]
struct SwapResponse {
    image: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

const NO_FACE: &str = "no_face";

impl InferenceClient {
    pub fn new(
        base_url: &str,
        providers: Vec<ExecutionProvider>,
        timeout: Duration,
    ) -> Result<Self, EngineError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::ModelFailure(format!("HTTP client setup failed: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            providers,
            ready: AtomicBool::new(false),
        })
    }

    /// Ask the sidecar to load its models on the configured providers.
    /// Marks the engine ready on success.
    pub async fn load(&self) -> Result<(), EngineError> {
        let response = self
            .http
            .post(self.url("/models/load"))
            .json(&LoadRequest {
                execution_providers: &self.providers,
            })
            .send()
            .await
            .map_err(http_failure)?;

        if !response.status().is_success() {
            return Err(status_failure(response).await);
        }

        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl FaceSwapEngine for InferenceClient {
    async fn analyse_source(&self, image: &RgbImage) -> Result<SourceFace, EngineError> {
        let response = self
            .http
            .post(self.url("/analyse"))
            .json(&AnalyseRequest {
                image: encode_png(image)?,
            })
            .send()
            .await
            .map_err(http_failure)?;

        if !response.status().is_success() {
            return Err(status_failure(response).await);
        }

        let body: AnalyseResponse = response.json().await.map_err(http_failure)?;
        body.faces.into_iter().next().ok_or(EngineError::NoFaceDetected)
    }

    async fn swap(
        &self,
        source: &SourceFace,
        frame: &RgbImage,
        options: SwapOptions,
    ) -> Result<RgbImage, EngineError> {
        let response = self
            .http
            .post(self.url("/swap"))
            .json(&SwapRequest {
                source,
                frame: encode_png(frame)?,
                many_faces: options.many_faces,
                enhance: options.enhance,
            })
            .send()
            .await
            .map_err(http_failure)?;

        if !response.status().is_success() {
            return Err(status_failure(response).await);
        }

        let body: SwapResponse = response.json().await.map_err(http_failure)?;
        decode_png(&body.image)
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

fn http_failure(e: reqwest::Error) -> EngineError {
    EngineError::ModelFailure(format!("Inference request failed: {e}"))
}

/// Map a non-success response. `422 {"error": "no_face"}` is the sidecar's
/// way of saying the image had nothing to swap.
async fn status_failure(response: reqwest::Response) -> EngineError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    classify_failure(status, &body)
}

fn classify_failure(status: StatusCode, body: &str) -> EngineError {
    if status == StatusCode::UNPROCESSABLE_ENTITY {
        if let Ok(err) = serde_json::from_str::<ErrorBody>(body) {
            if err.error == NO_FACE {
                return EngineError::NoFaceDetected;
            }
        }
    }
    EngineError::ModelFailure(format!("Inference service returned {status}: {body}"))
}

fn encode_png(image: &RgbImage) -> Result<String, EngineError> {
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| EngineError::ModelFailure(format!("Failed to encode frame: {e}")))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(buf.into_inner()))
}

fn decode_png(data: &str) -> Result<RgbImage, EngineError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| EngineError::ModelFailure(format!("Invalid base64 in response: {e}")))?;
    let image = image::load_from_memory_with_format(&bytes, ImageFormat::Png)
        .map_err(|e| EngineError::ModelFailure(format!("Invalid image in response: {e}")))?;
    Ok(image.to_rgb8())
}
