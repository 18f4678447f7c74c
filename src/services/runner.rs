//! Drives a single video job from `queued` to a terminal state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::models::job::{Job, SwapOptions};
use crate::services::engine::{EngineError, FaceSwapEngine, SourceFace};
use crate::services::job_store::{JobError, JobStore};
use crate::services::media::{MediaBackend, MediaError};

pub struct JobRunner {
    job_id: Uuid,
    store: Arc<JobStore>,
    engine: Arc<dyn FaceSwapEngine>,
    media: Arc<dyn MediaBackend>,
    source_face: SourceFace,
    options: SwapOptions,
    input: PathBuf,
    output: PathBuf,
}

/// How a runner left its job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { frames: u64 },
    Failed,
    /// The record was purged while the runner held it; nothing was reported.
    Purged,
}

#[derive(Debug, thiserror::Error)]
enum RunError {
    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Store(#[from] JobError),

    #[error("Video contained no readable frames")]
    NoFrames,
}

impl JobRunner {
    /// `input` must already hold the uploaded video inside the job's workspace.
    pub fn new(
        job_id: Uuid,
        store: Arc<JobStore>,
        engine: Arc<dyn FaceSwapEngine>,
        media: Arc<dyn MediaBackend>,
        source_face: SourceFace,
        options: SwapOptions,
        input: PathBuf,
    ) -> Self {
        let output = store.workspace(job_id).result_path();
        Self {
            job_id,
            store,
            engine,
            media,
            source_face,
            options,
            input,
            output,
        }
    }

    /// Run the job on its own task. The caller does not wait for it.
    pub fn spawn(self) -> JoinHandle<RunOutcome> {
        tokio::spawn(self.run())
    }

    /// Process the job to completion. Every outcome is recorded on the job;
    /// the returned [`RunOutcome`] only says which way it went.
    pub async fn run(self) -> RunOutcome {
        let job_id = self.job_id;
        let started = Instant::now();

        let outcome = if let Err(e) = self.store.update(job_id, Job::start) {
            tracing::warn!(job_id = %job_id, error = %e, "Job vanished before it started");
            self.discard_output().await;
            RunOutcome::Purged
        } else {
            tracing::info!(job_id = %job_id, options = ?self.options, "Processing video job");
            self.finish(self.process().await, started).await
        };

        if let Err(e) = tokio::fs::remove_file(&self.input).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to remove job input");
            }
        }
        outcome
    }

    async fn finish(&self, result: Result<u64, RunError>, started: Instant) -> RunOutcome {
        let job_id = self.job_id;
        match result {
            Ok(frames) => {
                let output = self.output.clone();
                match self.store.update(job_id, |job| job.complete(output, frames)) {
                    Ok(()) => {
                        metrics::counter!("video_jobs_completed_total").increment(1);
                        metrics::histogram!("video_job_processing_seconds")
                            .record(started.elapsed().as_secs_f64());
                        tracing::info!(
                            job_id = %job_id,
                            frames,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "Video job completed"
                        );
                        RunOutcome::Completed { frames }
                    }
                    Err(e) => {
                        tracing::info!(job_id = %job_id, error = %e, "Job purged before completion");
                        self.discard_output().await;
                        RunOutcome::Purged
                    }
                }
            }
            Err(RunError::Store(e)) => {
                tracing::info!(job_id = %job_id, error = %e, "Job purged while processing, stopping");
                self.discard_output().await;
                RunOutcome::Purged
            }
            Err(e) => {
                self.discard_output().await;
                let message = e.to_string();
                // A purge removes the job directory, so media I/O usually
                // notices before the store does.
                match self.store.update(job_id, |job| job.fail(message.clone())) {
                    Ok(()) => {
                        metrics::counter!("video_jobs_failed_total").increment(1);
                        tracing::error!(job_id = %job_id, error = %message, "Video job failed");
                        RunOutcome::Failed
                    }
                    Err(JobError::NotFound(_)) => {
                        tracing::info!(job_id = %job_id, error = %message, "Job purged while processing, stopping");
                        RunOutcome::Purged
                    }
                    Err(e) => {
                        tracing::warn!(job_id = %job_id, error = %e, "Could not record job failure");
                        RunOutcome::Failed
                    }
                }
            }
        }
    }

    async fn process(&self) -> Result<u64, RunError> {
        let mut source = self.media.open(&self.input).await?;
        let info = source.info().clone();
        if let Some(total) = info.frame_count {
            self.store
                .update(self.job_id, |job| job.set_total_frames(total))?;
        }
        tracing::debug!(
            job_id = %self.job_id,
            width = info.width,
            height = info.height,
            fps = info.fps,
            frame_count = ?info.frame_count,
            "Opened target video"
        );

        let mut sink = self.media.create(&self.output, &info, &self.input).await?;

        let mut processed = 0u64;
        while let Some(frame) = source.next_frame().await? {
            let swapped = match self
                .engine
                .swap(&self.source_face, &frame, self.options)
                .await
            {
                Ok(swapped) => swapped,
                Err(EngineError::NoFaceDetected) => {
                    metrics::counter!("video_frames_passthrough_total").increment(1);
                    tracing::trace!(job_id = %self.job_id, frame = processed, "No face in frame, passing through");
                    frame
                }
                Err(e) => return Err(e.into()),
            };

            sink.write_frame(&swapped).await?;
            processed += 1;
            self.store.update(self.job_id, Job::record_frame)?;
            metrics::counter!("video_frames_processed_total").increment(1);
        }

        if processed == 0 {
            // Nothing to encode; dropping the sink abandons the output.
            return Err(RunError::NoFrames);
        }
        sink.finish().await?;
        Ok(processed)
    }

    async fn discard_output(&self) {
        if let Err(e) = tokio::fs::remove_file(&self.output).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(job_id = %self.job_id, error = %e, "Failed to remove partial output");
            }
        }
    }
}
