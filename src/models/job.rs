use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Status of a video face-swap job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Done,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

/// Swap configuration captured at submission time.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SwapOptions {
    /// Swap every detected face instead of only the most prominent one.
    #[serde(default)]
    pub many_faces: bool,

    /// Run the enhancement model over the swapped frame.
    #[serde(default)]
    pub enhance: bool,
}

/// A tracked video face-swap job.
///
/// Snapshots handed out by the job store are plain clones; only the job's
/// runner mutates the live record, through the transition methods below.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    pub processed_frames: u64,
    /// Zero until known. While decoding without container metadata this is a
    /// lower bound that is finalized when the last frame has been read.
    pub total_frames: u64,
    pub error: Option<String>,
    pub result_path: Option<PathBuf>,
    pub options: SwapOptions,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub(crate) fn new(id: Uuid, options: SwapOptions) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: JobStatus::Queued,
            processed_frames: 0,
            total_frames: 0,
            error: None,
            result_path: None,
            options,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Whole-number completion percentage, 0 while the total is unknown.
    pub fn percent_complete(&self) -> u8 {
        if self.total_frames == 0 {
            return 0;
        }
        let pct = self.processed_frames.saturating_mul(100) / self.total_frames;
        pct.min(100) as u8
    }

    pub(crate) fn start(&mut self) {
        self.status = JobStatus::Processing;
        self.touch();
    }

    pub(crate) fn set_total_frames(&mut self, total: u64) {
        self.total_frames = total.max(self.processed_frames);
        self.touch();
    }

    /// Count one more processed frame, raising a lower-bound total if needed.
    pub(crate) fn record_frame(&mut self) {
        self.processed_frames += 1;
        if self.processed_frames > self.total_frames {
            self.total_frames = self.processed_frames;
        }
        self.touch();
    }

    pub(crate) fn complete(&mut self, result_path: PathBuf, frames: u64) {
        self.processed_frames = frames;
        self.total_frames = frames;
        self.result_path = Some(result_path);
        self.error = None;
        self.status = JobStatus::Done;
        self.finish();
    }

    pub(crate) fn fail(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        self.result_path = None;
        self.status = JobStatus::Failed;
        self.finish();
    }

    fn finish(&mut self) {
        self.touch();
        self.finished_at = Some(self.updated_at);
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Response after submitting a video for processing.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
}

/// Polling document for a video job.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub status: JobStatus,
    pub processed_frames: u64,
    pub total_frames: u64,
    pub error: Option<String>,
}

impl From<&Job> for JobStatusResponse {
    fn from(job: &Job) -> Self {
        Self {
            status: job.status,
            processed_frames: job.processed_frames,
            total_frames: job.total_frames,
            error: job.error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn new_job() -> Job {
        Job::new(Uuid::new_v4(), SwapOptions::default())
    }

    #[test]
    fn test_new_job_is_queued() {
        let job = new_job();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.processed_frames, 0);
        assert_eq!(job.total_frames, 0);
        assert!(job.finished_at.is_none());
    }

    #[test]
    fn test_record_frame_raises_lower_bound_total() {
        let mut job = new_job();
        job.start();
        job.record_frame();
        job.record_frame();
        assert_eq!(job.processed_frames, 2);
        assert_eq!(job.total_frames, 2);
    }

    #[test]
    fn test_known_total_is_kept_while_processing() {
        let mut job = new_job();
        job.start();
        job.set_total_frames(10);
        job.record_frame();
        assert_eq!(job.total_frames, 10);
        assert_eq!(job.percent_complete(), 10);
    }

    #[test]
    fn test_total_never_drops_below_processed() {
        let mut job = new_job();
        job.record_frame();
        job.record_frame();
        job.set_total_frames(1);
        assert_eq!(job.total_frames, 2);
    }

    #[test]
    fn test_complete_finalizes_counts() {
        let mut job = new_job();
        job.set_total_frames(12);
        for _ in 0..10 {
            job.record_frame();
        }
        job.complete(PathBuf::from("/tmp/out.mp4"), 10);
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.total_frames, 10);
        assert_eq!(job.percent_complete(), 100);
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn test_fail_clears_result_path() {
        let mut job = new_job();
        job.result_path = Some(PathBuf::from("/tmp/partial.mp4"));
        job.fail("boom");
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("boom"));
        assert!(job.result_path.is_none());
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(JobStatus::Processing.to_string(), "processing");
        assert_eq!(JobStatus::from_str("done").unwrap(), JobStatus::Done);
        assert_eq!(serde_json::to_string(&JobStatus::Queued).unwrap(), "\"queued\"");
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }
}
