//! In-memory job store for single-process deployments and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use reclip_models::{Job, JobId, JobStatus};
use tokio::sync::RwLock;

use crate::error::{StorageError, StorageResult};
use crate::store::{stamp_log_lines, tail_lines, ClaimOutcome, JobMutation, JobStore};

#[derive(Default)]
struct Entry {
    job: Option<Job>,
    logs: Vec<String>,
}

/// Job store backed by a `RwLock<HashMap>`. The write lock makes the claim
/// a compare-and-swap.
#[derive(Default)]
pub struct MemoryJobStore {
    entries: RwLock<HashMap<JobId, Entry>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs.
    pub async fn len(&self) -> usize {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.job.is_some())
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: &Job) -> StorageResult<()> {
        let mut entries = self.entries.write().await;
        let entry = entries.entry(job.id.clone()).or_default();
        if entry.job.is_some() {
            return Err(StorageError::AlreadyExists(job.id.to_string()));
        }
        entry.job = Some(job.clone());
        Ok(())
    }

    async fn get(&self, id: &JobId) -> StorageResult<Job> {
        self.entries
            .read()
            .await
            .get(id)
            .and_then(|e| e.job.clone())
            .ok_or_else(|| StorageError::job_not_found(id.as_str()))
    }

    async fn claim(&self, id: &JobId) -> StorageResult<ClaimOutcome> {
        let mut entries = self.entries.write().await;
        let job = entries
            .get_mut(id)
            .and_then(|e| e.job.as_mut())
            .ok_or_else(|| StorageError::job_not_found(id.as_str()))?;

        if job.status != JobStatus::Queued {
            return Ok(ClaimOutcome::NotClaimable(job.status));
        }
        job.start()?;
        Ok(ClaimOutcome::Claimed(job.clone()))
    }

    async fn modify(&self, id: &JobId, mutation: JobMutation) -> StorageResult<Job> {
        let mut entries = self.entries.write().await;
        let stored = entries
            .get_mut(id)
            .and_then(|e| e.job.as_mut())
            .ok_or_else(|| StorageError::job_not_found(id.as_str()))?;

        let mut next = stored.clone();
        mutation(&mut next)?;
        *stored = next.clone();
        Ok(next)
    }

    async fn append_logs(&self, id: &JobId, lines: &[String]) -> StorageResult<()> {
        if lines.is_empty() {
            return Ok(());
        }
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(id)
            .filter(|e| e.job.is_some())
            .ok_or_else(|| StorageError::job_not_found(id.as_str()))?;
        entry.logs.extend(stamp_log_lines(now, lines));
        Ok(())
    }

    async fn logs(&self, id: &JobId, tail: Option<usize>) -> StorageResult<Vec<String>> {
        let entries = self.entries.read().await;
        let entry = entries
            .get(id)
            .filter(|e| e.job.is_some())
            .ok_or_else(|| StorageError::job_not_found(id.as_str()))?;
        Ok(tail_lines(entry.logs.clone(), tail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reclip_models::{ConcatParams, JobParams, Summary, UploadId};
    use std::sync::Arc;

    fn job() -> Job {
        Job::new(JobParams::Concat(ConcatParams::new(
            vec![UploadId::new()],
            vec![UploadId::new()],
        )))
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MemoryJobStore::new();
        let job = job();
        store.create(&job).await.unwrap();

        assert_eq!(store.get(&job.id).await.unwrap(), job);
        assert!(store.create(&job).await.is_err());
        assert!(store.get(&JobId::new()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let store = Arc::new(MemoryJobStore::new());
        let job = job();
        store.create(&job).await.unwrap();

        let attempts = (0..16).map(|_| {
            let store = Arc::clone(&store);
            let id = job.id.clone();
            tokio::spawn(async move { store.claim(&id).await.unwrap() })
        });
        let outcomes = futures::future::join_all(attempts).await;

        let claimed = outcomes
            .into_iter()
            .filter(|o| o.as_ref().unwrap().is_claimed())
            .count();
        assert_eq!(claimed, 1);
        assert_eq!(store.get(&job.id).await.unwrap().status, JobStatus::Running);
    }

    #[tokio::test]
    async fn test_failed_mutation_is_not_persisted() {
        let store = MemoryJobStore::new();
        let job = job();
        store.create(&job).await.unwrap();

        let err = store
            .finish(&job.id, vec!["a.mp4".into()], Summary::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Transition(_)));

        let stored = store.get(&job.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Queued);
        assert!(stored.outputs.is_empty());
    }

    #[tokio::test]
    async fn test_logs_tail() {
        let store = MemoryJobStore::new();
        let job = job();
        store.create(&job).await.unwrap();

        let lines: Vec<String> = (1..=5).map(|i| format!("line {}", i)).collect();
        store.append_logs(&job.id, &lines).await.unwrap();

        let tail = store.logs(&job.id, Some(2)).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert!(tail[0].ends_with("] line 4"));
        assert!(tail[1].ends_with("] line 5"));
        assert_eq!(store.logs(&job.id, None).await.unwrap().len(), 5);

        assert!(store.append_logs(&JobId::new(), &lines).await.is_err());
    }
}
