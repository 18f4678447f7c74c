//! In-memory registry of video jobs.
//!
//! Every read and write goes through one short-held mutex, so a poller always
//! sees a job as it was between two complete transitions. The lock is never
//! held across an `.await`; file removal happens after the record is gone.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use uuid::Uuid;

use crate::models::job::{Job, JobStatus, SwapOptions};
use crate::services::storage::{JobWorkspace, Storage};

pub struct JobStore {
    registry: Mutex<Registry>,
    storage: Storage,
    max_active: usize,
}

#[derive(Default)]
struct Registry {
    jobs: HashMap<Uuid, Job>,
    /// Jobs that were purged or downloaded, with the time they went away.
    /// Kept for one retention period so downloads can answer `Gone`.
    purged: HashMap<Uuid, DateTime<Utc>>,
}

impl Registry {
    fn active(&self) -> usize {
        self.jobs.values().filter(|j| !j.status.is_terminal()).count()
    }

    fn remove(&mut self, job_id: Uuid) -> Option<Job> {
        let job = self.jobs.remove(&job_id)?;
        self.purged.insert(job_id, Utc::now());
        Some(job)
    }

    fn publish_active(&self) {
        metrics::gauge!("video_jobs_active").set(self.active() as f64);
    }
}

impl JobStore {
    pub fn new(storage: Storage, max_active: usize) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            storage,
            max_active,
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn workspace(&self, job_id: Uuid) -> JobWorkspace {
        self.storage.workspace(job_id)
    }

    /// Register a new `queued` job, unless the in-flight limit is reached.
    pub fn create(&self, options: SwapOptions) -> Result<Uuid, JobError> {
        let mut registry = self.registry.lock();
        if registry.active() >= self.max_active {
            return Err(JobError::ResourceExhausted {
                limit: self.max_active,
            });
        }

        let mut job_id = Uuid::new_v4();
        while registry.jobs.contains_key(&job_id) || registry.purged.contains_key(&job_id) {
            job_id = Uuid::new_v4();
        }
        registry.jobs.insert(job_id, Job::new(job_id, options));
        registry.publish_active();
        Ok(job_id)
    }

    /// Snapshot of a job's current state.
    pub fn get(&self, job_id: Uuid) -> Result<Job, JobError> {
        self.registry
            .lock()
            .jobs
            .get(&job_id)
            .cloned()
            .ok_or(JobError::NotFound(job_id))
    }

    /// Apply one atomic mutation to a live job. Finished jobs are frozen.
    pub(crate) fn update<F>(&self, job_id: Uuid, mutate: F) -> Result<(), JobError>
    where
        F: FnOnce(&mut Job),
    {
        let mut registry = self.registry.lock();
        let job = registry
            .jobs
            .get_mut(&job_id)
            .ok_or(JobError::NotFound(job_id))?;
        if job.status.is_terminal() {
            return Err(JobError::Finalized(job_id));
        }
        mutate(job);
        if job.status.is_terminal() {
            registry.publish_active();
        }
        Ok(())
    }

    /// Hand out the finished artifact of a `done` job. The result file is
    /// opened before the record is retired, so the artifact stays readable
    /// even if the reaper removes the directory in between. Each result can
    /// be taken once.
    pub async fn take_result(&self, job_id: Uuid) -> Result<Artifact, JobError> {
        let path = {
            let registry = self.registry.lock();
            ready_result(&registry, job_id)?
        };
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(JobError::ArtifactMissing(job_id));
            }
            Err(e) => return Err(JobError::Io(e)),
        };

        // A concurrent download or purge may have won while the file opened.
        let mut registry = self.registry.lock();
        ready_result(&registry, job_id)?;
        registry.remove(job_id);

        Ok(Artifact {
            job_id,
            path,
            file,
            workspace: self.storage.workspace(job_id),
        })
    }

    /// Delete a job's record and files. Unknown ids are a no-op.
    pub async fn purge(&self, job_id: Uuid) -> Result<(), JobError> {
        let removed = {
            let mut registry = self.registry.lock();
            let removed = registry.remove(job_id);
            registry.publish_active();
            removed
        };
        if removed.is_some() {
            metrics::counter!("jobs_purged_total").increment(1);
            tracing::debug!(job_id = %job_id, "Purged job");
        }
        self.storage.remove(job_id).await?;
        Ok(())
    }

    /// Purge finished jobs older than `ttl` and unfinished jobs that have made
    /// no progress for `ttl`. Tombstones older than `ttl` are forgotten.
    pub async fn purge_expired(&self, ttl: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
        else {
            return 0;
        };

        let expired: Vec<(Uuid, JobStatus)> = {
            let mut registry = self.registry.lock();
            registry.purged.retain(|_, at| *at >= cutoff);
            let expired: Vec<(Uuid, JobStatus)> = registry
                .jobs
                .values()
                .filter(|job| match job.finished_at {
                    Some(finished) => finished < cutoff,
                    None => job.updated_at < cutoff,
                })
                .map(|job| (job.id, job.status))
                .collect();
            for (job_id, _) in &expired {
                registry.remove(*job_id);
            }
            registry.publish_active();
            expired
        };

        for (job_id, status) in &expired {
            if !status.is_terminal() {
                tracing::warn!(job_id = %job_id, status = %status, "Purging stalled job");
            }
            if let Err(e) = self.storage.remove(*job_id).await {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to remove job files");
            }
        }
        if !expired.is_empty() {
            metrics::counter!("jobs_purged_total").increment(expired.len() as u64);
        }
        expired.len()
    }

    /// Purge every job, used on shutdown.
    pub async fn purge_all(&self) -> usize {
        let ids: Vec<Uuid> = {
            let mut registry = self.registry.lock();
            let ids: Vec<Uuid> = registry.jobs.keys().copied().collect();
            for job_id in &ids {
                registry.remove(*job_id);
            }
            registry.publish_active();
            ids
        };

        for job_id in &ids {
            if let Err(e) = self.storage.remove(*job_id).await {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to remove job files");
            }
        }
        ids.len()
    }

    /// Remove job directories that no live record owns.
    pub async fn reap_orphans(&self) -> io::Result<usize> {
        self.storage
            .sweep_orphans(|job_id| self.registry.lock().jobs.contains_key(&job_id))
            .await
    }

    /// Number of queued or processing jobs.
    pub fn active_count(&self) -> usize {
        self.registry.lock().active()
    }

    /// Number of registered jobs in any state.
    pub fn len(&self) -> usize {
        self.registry.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result path of a `done` job that is still registered.
fn ready_result(registry: &Registry, job_id: Uuid) -> Result<PathBuf, JobError> {
    if registry.purged.contains_key(&job_id) {
        return Err(JobError::Gone(job_id));
    }
    let job = registry
        .jobs
        .get(&job_id)
        .ok_or(JobError::NotFound(job_id))?;
    if job.status != JobStatus::Done {
        return Err(JobError::NotReady {
            job_id,
            status: job.status,
        });
    }
    job.result_path
        .clone()
        .ok_or(JobError::ArtifactMissing(job_id))
}

/// A finished video, taken out of the store for download.
#[derive(Debug)]
pub struct Artifact {
    job_id: Uuid,
    path: PathBuf,
    file: File,
    workspace: JobWorkspace,
}

impl Artifact {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Content type for the download, from the file extension.
    pub fn media_type(&self) -> &'static str {
        match self.path.extension().and_then(|e| e.to_str()) {
            Some("mp4") => "video/mp4",
            Some("jpg") | Some("jpeg") => "image/jpeg",
            _ => "application/octet-stream",
        }
    }

    /// Attachment name offered to the client.
    pub fn file_name(&self) -> String {
        let ext = self
            .path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin");
        format!("result.{ext}")
    }

    /// Read the artifact and delete the job's directory.
    pub async fn into_bytes(mut self) -> Result<Vec<u8>, JobError> {
        let mut bytes = Vec::new();
        let read = self.file.read_to_end(&mut bytes).await;
        drop(self.file);
        if let Err(e) = self.workspace.remove().await {
            tracing::warn!(job_id = %self.job_id, error = %e, "Failed to remove job files after download");
        }
        read?;
        Ok(bytes)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Job {job_id} is not done (status: {status})")]
    NotReady { job_id: Uuid, status: JobStatus },

    #[error("Job {0} result is no longer available")]
    Gone(Uuid),

    #[error("Too many video jobs in flight (limit {limit})")]
    ResourceExhausted { limit: usize },

    #[error("Job {0} already finished")]
    Finalized(Uuid),

    #[error("Result file for job {0} is missing")]
    ArtifactMissing(Uuid),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
