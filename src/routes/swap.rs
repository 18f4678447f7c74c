use std::io::Cursor;

use axum::body::Bytes;
use axum::extract::{Multipart, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use image::{ImageFormat, RgbImage};

use crate::app_state::AppState;
use crate::error::{ApiError, ApiResult};
use crate::models::job::{SubmitResponse, SwapOptions};
use crate::services::engine::{EngineError, SourceFace};
use crate::services::runner::JobRunner;
use crate::services::storage::video_extension;

/// One uploaded multipart file.
struct Upload {
    data: Bytes,
    file_name: Option<String>,
}

/// POST /swap: swap the source face into a target image and return a JPEG.
pub async fn swap_image(
    State(state): State<AppState>,
    Query(options): Query<SwapOptions>,
    multipart: Multipart,
) -> ApiResult<Response> {
    let (source, target) = read_uploads(multipart).await?;
    let limit = state.config.max_image_bytes;
    check_size(&source, limit, "Source file")?;
    check_size(&target, limit, "Target file")?;

    let source_img = decode_image(&source.data, "source")?;
    let target_img = decode_image(&target.data, "target")?;

    let face = analyse_source(&state, &source_img).await?;
    let swapped = state.engine.swap(&face, &target_img, options).await?;
    let jpeg = encode_jpeg(&swapped)?;

    metrics::counter!("image_swaps_total").increment(1);
    Ok(([(header::CONTENT_TYPE, "image/jpeg")], jpeg).into_response())
}

/// POST /swap/video: accept a video job and return its id immediately.
pub async fn submit_video(
    State(state): State<AppState>,
    Query(options): Query<SwapOptions>,
    multipart: Multipart,
) -> ApiResult<Json<SubmitResponse>> {
    let (source, target) = read_uploads(multipart).await?;
    check_size(&source, state.config.max_image_bytes, "Source file")?;
    check_size(&target, state.config.max_video_bytes, "Target video")?;

    let source_img = decode_image(&source.data, "source")?;
    let face = analyse_source(&state, &source_img).await?;

    let job_id = state.jobs.create(options).inspect_err(|e| {
        metrics::counter!("video_jobs_rejected_total").increment(1);
        tracing::warn!(error = %e, "Rejected video submission");
    })?;

    let workspace = state.jobs.workspace(job_id);
    let input = workspace.input_path(&video_extension(target.file_name.as_deref()));
    let stored = match workspace.create().await {
        Ok(()) => tokio::fs::write(&input, &target.data).await,
        Err(e) => Err(e),
    };
    if let Err(e) = stored {
        if let Err(purge_err) = state.jobs.purge(job_id).await {
            tracing::warn!(job_id = %job_id, error = %purge_err, "Failed to purge unstarted job");
        }
        return Err(ApiError::Internal(format!("Failed to store upload: {e}")));
    }

    JobRunner::new(
        job_id,
        state.jobs.clone(),
        state.engine.clone(),
        state.media.clone(),
        face,
        options,
        input,
    )
    .spawn();

    metrics::counter!("video_jobs_submitted_total").increment(1);
    tracing::info!(
        job_id = %job_id,
        bytes = target.data.len(),
        many_faces = options.many_faces,
        enhance = options.enhance,
        "Video job submitted"
    );

    Ok(Json(SubmitResponse { job_id }))
}

/// Collect the `source` and `target` file fields; other fields are ignored.
async fn read_uploads(mut multipart: Multipart) -> ApiResult<(Upload, Upload)> {
    let mut source = None;
    let mut target = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("Malformed upload: {e}")))?
    {
        let name = field.name().map(str::to_owned);
        let file_name = field.file_name().map(str::to_owned);
        let slot = match name.as_deref() {
            Some("source") => &mut source,
            Some("target") => &mut target,
            _ => continue,
        };
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::Validation(format!("Malformed upload: {e}")))?;
        *slot = Some(Upload { data, file_name });
    }

    let source = source.ok_or_else(|| ApiError::Validation("Missing source file".to_string()))?;
    let target = target.ok_or_else(|| ApiError::Validation("Missing target file".to_string()))?;
    Ok((source, target))
}

fn check_size(upload: &Upload, limit: usize, label: &str) -> ApiResult<()> {
    if upload.data.is_empty() {
        return Err(ApiError::Validation(format!("{label} is empty")));
    }
    if upload.data.len() > limit {
        let mb = limit / (1024 * 1024);
        return Err(ApiError::Validation(format!("{label} exceeds {mb} MB limit")));
    }
    Ok(())
}

fn decode_image(data: &[u8], label: &str) -> ApiResult<RgbImage> {
    image::load_from_memory(data)
        .map(|img| img.to_rgb8())
        .map_err(|_| ApiError::Validation(format!("Could not decode {label} image")))
}

fn encode_jpeg(image: &RgbImage) -> ApiResult<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, ImageFormat::Jpeg)
        .map_err(|e| ApiError::Internal(format!("Failed to encode result image: {e}")))?;
    Ok(buf.into_inner())
}

async fn analyse_source(state: &AppState, image: &RgbImage) -> ApiResult<SourceFace> {
    match state.engine.analyse_source(image).await {
        Ok(face) => Ok(face),
        Err(EngineError::NoFaceDetected) => Err(ApiError::NoFace(
            "No face detected in source image".to_string(),
        )),
        Err(e) => Err(e.into()),
    }
}
