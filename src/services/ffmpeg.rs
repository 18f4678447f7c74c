//! `MediaBackend` backed by the `ffmpeg`/`ffprobe` binaries.
//!
//! Frames travel as raw `rgb24` over the child's stdin/stdout, so no
//! intermediate image files are written. Child processes are killed when
//! their source or sink is dropped, which is how an aborted job releases them.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use async_trait::async_trait;
use image::RgbImage;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::services::media::{FrameSink, FrameSource, MediaBackend, MediaError, VideoInfo};

const DEFAULT_FPS: f64 = 30.0;

/// Bytes of child stderr kept for error messages.
const STDERR_TAIL: usize = 4096;

/// Locations of the `ffmpeg` and `ffprobe` binaries.
pub struct FfmpegBackend {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegBackend {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    async fn probe(&self, input: &Path) -> Result<VideoInfo, MediaError> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height,r_frame_rate,nb_frames",
                "-of",
                "json",
            ])
            .arg(input)
            .output()
            .await
            .map_err(|e| MediaError::Open(format!("failed to run ffprobe: {e}")))?;

        if !output.status.success() {
            return Err(MediaError::Open(stderr_of(&output)));
        }

        parse_probe(&String::from_utf8_lossy(&output.stdout))
    }
}

#[async_trait]
impl MediaBackend for FfmpegBackend {
    async fn open(&self, input: &Path) -> Result<Box<dyn FrameSource>, MediaError> {
        let info = self.probe(input).await?;

        let mut child = Command::new(&self.ffmpeg)
            .args(["-nostdin", "-v", "error", "-i"])
            .arg(input)
            .args(["-map", "0:v:0", "-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MediaError::Open(format!("failed to run ffmpeg: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::Open("ffmpeg stdout unavailable".to_string()))?;
        let stderr = drain_stderr(&mut child);

        Ok(Box::new(FfmpegSource {
            frame_len: frame_len(&info),
            info,
            child: Some(child),
            stdout,
            stderr,
        }))
    }

    async fn create(
        &self,
        output: &Path,
        info: &VideoInfo,
        audio_from: &Path,
    ) -> Result<Box<dyn FrameSink>, MediaError> {
        let size = format!("{}x{}", info.width, info.height);
        let rate = format!("{}", info.fps);

        let mut child = Command::new(&self.ffmpeg)
            .args(["-y", "-v", "error", "-f", "rawvideo", "-pix_fmt", "rgb24"])
            .args(["-s", size.as_str(), "-r", rate.as_str(), "-i", "pipe:0", "-i"])
            .arg(audio_from)
            .args([
                "-map",
                "0:v:0",
                "-map",
                "1:a:0?",
                "-vf",
                "pad=ceil(iw/2)*2:ceil(ih/2)*2",
                "-c:v",
                "libx264",
                "-pix_fmt",
                "yuv420p",
                "-c:a",
                "aac",
                "-shortest",
                "-movflags",
                "+faststart",
            ])
            .arg(output)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MediaError::Encode(format!("failed to run ffmpeg: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MediaError::Encode("ffmpeg stdin unavailable".to_string()))?;
        let stderr = drain_stderr(&mut child);

        Ok(Box::new(FfmpegSink {
            width: info.width,
            height: info.height,
            child,
            stdin: Some(stdin),
            stderr,
        }))
    }
}

struct FfmpegSource {
    info: VideoInfo,
    frame_len: usize,
    child: Option<Child>,
    stdout: ChildStdout,
    stderr: Option<JoinHandle<String>>,
}

impl FfmpegSource {
    /// Reap the decoder once its output is exhausted, surfacing its exit status.
    async fn close(&mut self) -> Result<(), MediaError> {
        let Some(child) = self.child.take() else {
            return Ok(());
        };
        wait_for(child, self.stderr.take(), MediaError::Decode).await
    }
}

#[async_trait]
impl FrameSource for FfmpegSource {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    async fn next_frame(&mut self) -> Result<Option<RgbImage>, MediaError> {
        if self.child.is_none() || self.frame_len == 0 {
            return Ok(None);
        }

        let mut buf = vec![0u8; self.frame_len];
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.stdout.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled < buf.len() {
            // A trailing partial frame is dropped.
            self.close().await?;
            return Ok(None);
        }

        RgbImage::from_raw(self.info.width, self.info.height, buf)
            .map(Some)
            .ok_or_else(|| MediaError::Decode("frame buffer size mismatch".to_string()))
    }
}

struct FfmpegSink {
    width: u32,
    height: u32,
    child: Child,
    stdin: Option<ChildStdin>,
    stderr: Option<JoinHandle<String>>,
}

#[async_trait]
impl FrameSink for FfmpegSink {
    async fn write_frame(&mut self, frame: &RgbImage) -> Result<(), MediaError> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(MediaError::Encode(format!(
                "frame is {}x{}, encoder expects {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| MediaError::Encode("encoder input already closed".to_string()))?;
        stdin.write_all(frame.as_raw()).await?;
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<(), MediaError> {
        let FfmpegSink {
            child,
            stdin,
            stderr,
            ..
        } = *self;
        if let Some(mut stdin) = stdin {
            stdin.shutdown().await?;
        }
        wait_for(child, stderr, MediaError::Encode).await
    }
}

/// Read a child's stderr on its own task, keeping only the tail. An unread
/// pipe would fill and stall the child mid-stream.
fn drain_stderr(child: &mut Child) -> Option<JoinHandle<String>> {
    let mut stderr = child.stderr.take()?;
    Some(tokio::spawn(async move {
        let mut tail = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            match stderr.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    tail.extend_from_slice(&buf[..n]);
                    if tail.len() > STDERR_TAIL {
                        let excess = tail.len() - STDERR_TAIL;
                        tail.drain(..excess);
                    }
                }
            }
        }
        String::from_utf8_lossy(&tail).trim().to_string()
    }))
}

/// Reap `child`; a non-zero exit becomes `fail` with the stderr tail.
async fn wait_for(
    mut child: Child,
    stderr: Option<JoinHandle<String>>,
    fail: fn(String) -> MediaError,
) -> Result<(), MediaError> {
    let status = child.wait().await?;
    let tail = match stderr {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };
    if status.success() {
        return Ok(());
    }
    if tail.is_empty() {
        Err(fail(format!("exited with {status}")))
    } else {
        Err(fail(tail))
    }
}

// ---------------------------------------------------------------------------
// ffprobe output parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
}

fn parse_probe(json: &str) -> Result<VideoInfo, MediaError> {
    let probe: ProbeOutput = serde_json::from_str(json)
        .map_err(|e| MediaError::Open(format!("unreadable ffprobe output: {e}")))?;

    let stream = probe
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| MediaError::Open("no video stream".to_string()))?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(MediaError::Open("video stream has no dimensions".to_string())),
    };

    let fps = stream
        .r_frame_rate
        .as_deref()
        .and_then(parse_fraction)
        .unwrap_or(DEFAULT_FPS);

    let frame_count = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<u64>().ok())
        .filter(|&n| n > 0);

    Ok(VideoInfo {
        width,
        height,
        fps,
        frame_count,
    })
}

/// Parse `"30/1"`, `"30000/1001"` or `"25"`. Zero or malformed rates yield `None`.
fn parse_fraction(s: &str) -> Option<f64> {
    let rate = match s.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => s.trim().parse().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

fn frame_len(info: &VideoInfo) -> usize {
    info.width as usize * info.height as usize * 3
}

fn stderr_of(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        format!("exited with {}", output.status)
    } else {
        stderr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fraction_standard() {
        assert_eq!(parse_fraction("30/1"), Some(30.0));
    }

    #[test]
    fn test_parse_fraction_ntsc() {
        let fps = parse_fraction("30000/1001").unwrap();
        assert!((fps - 29.97).abs() < 0.01);
    }

    #[test]
    fn test_parse_fraction_rejects_zero() {
        assert_eq!(parse_fraction("0/0"), None);
        assert_eq!(parse_fraction("0"), None);
        assert_eq!(parse_fraction("abc"), None);
        assert_eq!(parse_fraction("25"), Some(25.0));
    }

    #[test]
    fn test_parse_probe_with_frame_count() {
        let json = r#"{"streams":[{"width":1280,"height":720,"r_frame_rate":"25/1","nb_frames":"250"}]}"#;
        let info = parse_probe(json).unwrap();
        assert_eq!(
            info,
            VideoInfo {
                width: 1280,
                height: 720,
                fps: 25.0,
                frame_count: Some(250),
            }
        );
        assert_eq!(frame_len(&info), 1280 * 720 * 3);
    }

    #[test]
    fn test_parse_probe_without_frame_count() {
        // Matroska/WebM streams usually omit nb_frames.
        let json = r#"{"streams":[{"width":640,"height":360,"r_frame_rate":"0/0"}]}"#;
        let info = parse_probe(json).unwrap();
        assert_eq!(info.frame_count, None);
        assert_eq!(info.fps, DEFAULT_FPS);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_noisy_stderr_does_not_stall_child() {
        // Far more than a pipe buffer of error output, then a failing exit.
        let mut child = Command::new("sh")
            .args([
                "-c",
                "yes 'error while decoding MB' | head -c 300000 >&2; exit 3",
            ])
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let stderr = drain_stderr(&mut child);

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            wait_for(child, stderr, MediaError::Decode),
        )
        .await
        .expect("child blocked writing stderr");

        match result {
            Err(MediaError::Decode(msg)) => {
                assert!(msg.len() <= STDERR_TAIL);
                assert!(msg.contains("error while decoding MB"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_clean_exit_is_ok() {
        let mut child = Command::new("sh")
            .args(["-c", "echo warning >&2"])
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let stderr = drain_stderr(&mut child);
        assert!(wait_for(child, stderr, MediaError::Encode).await.is_ok());
    }

    #[test]
    fn test_parse_probe_without_video_stream() {
        assert!(matches!(
            parse_probe(r#"{"streams":[]}"#),
            Err(MediaError::Open(_))
        ));
        assert!(matches!(parse_probe("not json"), Err(MediaError::Open(_))));
    }
}
