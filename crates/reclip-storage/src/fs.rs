//! Filesystem job store.
//!
//! Records live at `<jobs_dir>/<id>/job.json` and are replaced atomically.
//! Logs are appended to `<jobs_dir>/<id>/logs.txt`. Writers in one process
//! are serialized by a per-job async mutex; the cross-process claim is an
//! exclusive `create_new` on `<jobs_dir>/<id>/claim.lock`.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::Utc;
use reclip_models::{Job, JobId, JobStatus};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};
use crate::fs_utils::write_atomic;
use crate::layout::JobLayout;
use crate::store::{stamp_log_lines, tail_lines, ClaimOutcome, JobMutation, JobStore};

const JOB_FILE: &str = "job.json";
const LOG_FILE: &str = "logs.txt";
const CLAIM_FILE: &str = "claim.lock";

/// Job store persisted as JSON files in the shared jobs directory.
pub struct FsJobStore {
    layout: JobLayout,
    locks: StdMutex<HashMap<JobId, Arc<Mutex<()>>>>,
}

impl FsJobStore {
    pub fn new(layout: JobLayout) -> Self {
        Self {
            layout,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn layout(&self) -> &JobLayout {
        &self.layout
    }

    fn lock_for(&self, id: &JobId) -> Arc<Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(id.clone()).or_default())
    }

    /// Drop the map entry once no other task holds the lock.
    fn release(&self, id: &JobId, lock: Arc<Mutex<()>>) {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if Arc::strong_count(&lock) == 2 {
            locks.remove(id);
        }
    }

    /// Run `op` while holding the per-job lock.
    async fn locked<T, F>(&self, id: &JobId, op: F) -> StorageResult<T>
    where
        F: Future<Output = StorageResult<T>>,
    {
        let lock = self.lock_for(id);
        let result = {
            let _guard = lock.lock().await;
            op.await
        };
        self.release(id, lock);
        result
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn file(&self, id: &JobId, name: &str) -> StorageResult<PathBuf> {
        self.layout
            .job_dir(id)
            .map(|dir| dir.join(name))
            .map_err(|_| StorageError::job_not_found(id.as_str()))
    }

    async fn read_job(&self, id: &JobId) -> StorageResult<Job> {
        let path = self.file(id, JOB_FILE)?;
        match fs::read(&path).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::job_not_found(id.as_str()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write_job(&self, job: &Job) -> StorageResult<()> {
        let path = self.file(&job.id, JOB_FILE)?;
        let raw = serde_json::to_vec_pretty(job)?;
        write_atomic(&path, &raw).await?;
        Ok(())
    }
}

/// Create the claim marker and run `commit` to record the claim. The marker
/// is removed again when `commit` fails, so the job stays claimable.
///
/// Returns `Ok(false)` when the marker already exists.
async fn claim_with_marker<F>(id: &JobId, marker: &Path, commit: F) -> StorageResult<bool>
where
    F: Future<Output = StorageResult<()>>,
{
    let mut file = match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(marker)
        .await
    {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e.into()),
    };

    let result = match file.write_all(Utc::now().to_rfc3339().as_bytes()).await {
        Ok(()) => commit.await,
        Err(e) => Err(e.into()),
    };
    if let Err(e) = result {
        if let Err(remove_err) = fs::remove_file(marker).await {
            warn!(job_id = %id, "Failed to remove claim marker: {}", remove_err);
        }
        return Err(e);
    }
    Ok(true)
}

#[async_trait]
impl JobStore for FsJobStore {
    async fn create(&self, job: &Job) -> StorageResult<()> {
        self.locked(&job.id, async {
            let path = self.file(&job.id, JOB_FILE)?;
            if fs::try_exists(&path).await? {
                return Err(StorageError::AlreadyExists(job.id.to_string()));
            }
            self.write_job(job).await
        })
        .await
    }

    async fn get(&self, id: &JobId) -> StorageResult<Job> {
        self.read_job(id).await
    }

    async fn claim(&self, id: &JobId) -> StorageResult<ClaimOutcome> {
        self.locked(id, async {
            let mut job = self.read_job(id).await?;
            if job.status != JobStatus::Queued {
                return Ok(ClaimOutcome::NotClaimable(job.status));
            }
            job.start()?;

            let marker = self.file(id, CLAIM_FILE)?;
            if !claim_with_marker(id, &marker, self.write_job(&job)).await? {
                debug!(job_id = %id, "Claim marker already present");
                let current = self.read_job(id).await?;
                return Ok(ClaimOutcome::NotClaimable(match current.status {
                    JobStatus::Queued => JobStatus::Running,
                    other => other,
                }));
            }
            Ok(ClaimOutcome::Claimed(job))
        })
        .await
    }

    async fn modify(&self, id: &JobId, mutation: JobMutation) -> StorageResult<Job> {
        self.locked(id, async move {
            let mut job = self.read_job(id).await?;
            mutation(&mut job)?;
            self.write_job(&job).await?;
            Ok(job)
        })
        .await
    }

    async fn append_logs(&self, id: &JobId, lines: &[String]) -> StorageResult<()> {
        if lines.is_empty() {
            return Ok(());
        }
        if !fs::try_exists(self.file(id, JOB_FILE)?).await? {
            return Err(StorageError::job_not_found(id.as_str()));
        }

        let now = Utc::now();
        let mut chunk = String::new();
        for line in stamp_log_lines(now, lines) {
            chunk.push_str(&line);
            chunk.push('\n');
        }

        let path = self.file(id, LOG_FILE)?;
        self.locked(id, async {
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            file.write_all(chunk.as_bytes()).await?;
            file.flush().await?;
            Ok(())
        })
        .await
    }

    async fn logs(&self, id: &JobId, tail: Option<usize>) -> StorageResult<Vec<String>> {
        if !fs::try_exists(self.file(id, JOB_FILE)?).await? {
            return Err(StorageError::job_not_found(id.as_str()));
        }
        let raw = match fs::read_to_string(self.file(id, LOG_FILE)?).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        let lines = raw.lines().map(str::to_string).collect();
        Ok(tail_lines(lines, tail))
    }
}
