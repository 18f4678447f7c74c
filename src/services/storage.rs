use std::io;
use std::path::{Path, PathBuf};

use uuid::Uuid;

const RESULT_FILE: &str = "result.mp4";
const INPUT_STEM: &str = "input";

/// Local job storage. Every file belonging to a job lives under
/// `<root>/<job_id>/`, so removing that directory releases all of it.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn workspace(&self, job_id: Uuid) -> JobWorkspace {
        JobWorkspace {
            dir: self.root.join(job_id.to_string()),
        }
    }

    /// Remove a job's directory. Missing directories are not an error.
    pub async fn remove(&self, job_id: Uuid) -> io::Result<()> {
        self.workspace(job_id).remove().await
    }

    /// Remove every job directory for which `is_live` is false. Liveness is
    /// checked per entry, after the directory has been seen. Entries that are
    /// not job directories are left alone. Returns how many were removed.
    pub async fn sweep_orphans<F>(&self, is_live: F) -> io::Result<usize>
    where
        F: Fn(Uuid) -> bool,
    {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(job_id) = entry.file_name().to_str().and_then(|n| Uuid::parse_str(n).ok())
            else {
                continue;
            };
            if is_live(job_id) {
                continue;
            }
            match tokio::fs::remove_dir_all(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(job_id = %job_id, error = %e, "Failed to remove orphaned job directory");
                }
            }
        }
        Ok(removed)
    }
}

/// Paths owned by a single job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobWorkspace {
    dir: PathBuf,
}

impl JobWorkspace {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn create(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await
    }

    /// Where the uploaded target video is stored, keeping its extension.
    pub fn input_path(&self, extension: &str) -> PathBuf {
        self.dir.join(format!("{INPUT_STEM}.{extension}"))
    }

    pub fn result_path(&self) -> PathBuf {
        self.dir.join(RESULT_FILE)
    }

    pub async fn remove(&self) -> io::Result<()> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// Reduce an uploaded file name to a safe container extension, defaulting
/// to `mp4`.
pub fn video_extension(file_name: Option<&str>) -> String {
    file_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 5)
        .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_else(|| "mp4".to_string())
}
