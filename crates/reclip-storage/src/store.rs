//! Job record store abstraction.
//!
//! Stores own the only mutable copy of each [`Job`]. All mutations go
//! through [`JobStore::modify`], which applies a closure under the store's
//! per-job serialization, so the status checks on `Job` are evaluated
//! against the current persisted state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reclip_models::{ArchiveVariant, Job, JobId, JobStatus, Summary};

use crate::error::StorageResult;

/// Mutation applied to a stored job.
pub type JobMutation = Box<dyn FnOnce(&mut Job) -> StorageResult<()> + Send>;

/// Result of an attempted `queued -> running` claim.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// This caller won the claim and now owns the job.
    Claimed(Job),
    /// Someone else already moved the job out of `queued`.
    NotClaimable(JobStatus),
}

impl ClaimOutcome {
    pub fn is_claimed(&self) -> bool {
        matches!(self, ClaimOutcome::Claimed(_))
    }
}

/// Persistent mapping of job id to job record plus its log lines.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new record. Fails if the id already exists.
    async fn create(&self, job: &Job) -> StorageResult<()>;

    /// Load a snapshot of a record.
    async fn get(&self, id: &JobId) -> StorageResult<Job>;

    /// Atomically move a job from `queued` to `running`.
    ///
    /// Exactly one concurrent caller observes `Claimed` for a given job.
    async fn claim(&self, id: &JobId) -> StorageResult<ClaimOutcome>;

    /// Apply `mutation` to the stored record and persist the result.
    /// Nothing is persisted when the mutation returns an error.
    async fn modify(&self, id: &JobId, mutation: JobMutation) -> StorageResult<Job>;

    /// Append lines to the job log, each stamped with the UTC time.
    async fn append_logs(&self, id: &JobId, lines: &[String]) -> StorageResult<()>;

    /// Last `tail` log lines, or all when `tail` is `None`.
    async fn logs(&self, id: &JobId, tail: Option<usize>) -> StorageResult<Vec<String>>;

    async fn record_progress(&self, id: &JobId, current: u32, total: u32) -> StorageResult<()> {
        self.modify(
            id,
            Box::new(move |job| {
                job.record_progress(current, total);
                Ok(())
            }),
        )
        .await
        .map(|_| ())
    }

    async fn finish(&self, id: &JobId, outputs: Vec<String>, summary: Summary) -> StorageResult<Job> {
        self.modify(id, Box::new(move |job| Ok(job.finish(outputs, summary)?)))
            .await
    }

    async fn fail(&self, id: &JobId, reason: String) -> StorageResult<Job> {
        self.modify(id, Box::new(move |job| Ok(job.fail(reason)?))).await
    }

    async fn merge_summary(&self, id: &JobId, summary: Summary) -> StorageResult<()> {
        self.modify(
            id,
            Box::new(move |job| {
                job.merge_summary(summary);
                Ok(())
            }),
        )
        .await
        .map(|_| ())
    }

    async fn mark_archive_ready(&self, id: &JobId, variant: ArchiveVariant) -> StorageResult<()> {
        self.modify(
            id,
            Box::new(move |job| {
                job.mark_archive_ready(variant);
                Ok(())
            }),
        )
        .await
        .map(|_| ())
    }
}

/// Prefix a log message with `[HH:MM:SS]`.
pub fn stamp_log_line(at: DateTime<Utc>, message: &str) -> String {
    format!("[{}] {}", at.format("%H:%M:%S"), message.trim_end_matches(['\r', '\n']))
}

/// Stamp a batch of messages, one stored line per physical line. Messages
/// with embedded `\n` or `\r\n` are split so every stored line carries
/// its own timestamp.
pub fn stamp_log_lines(at: DateTime<Utc>, messages: &[String]) -> Vec<String> {
    messages
        .iter()
        .flat_map(|message| message.trim_end_matches(['\r', '\n']).split('\n'))
        .map(|line| stamp_log_line(at, line))
        .collect()
}

/// Keep the last `tail` lines.
pub fn tail_lines(mut lines: Vec<String>, tail: Option<usize>) -> Vec<String> {
    if let Some(n) = tail {
        if lines.len() > n {
            lines.drain(..lines.len() - n);
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_stamp_log_line() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 9, 3, 7).unwrap();
        assert_eq!(stamp_log_line(at, "Staging inputs...\n"), "[09:03:07] Staging inputs...");
    }

    #[test]
    fn test_stamp_log_lines_splits_embedded_newlines() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 9, 3, 7).unwrap();
        let stamped = stamp_log_lines(
            at,
            &["ERROR: ffmpeg failed".into(), "stderr a\r\nstderr b\nstderr c\n".into()],
        );
        assert_eq!(
            stamped,
            vec![
                "[09:03:07] ERROR: ffmpeg failed",
                "[09:03:07] stderr a",
                "[09:03:07] stderr b",
                "[09:03:07] stderr c",
            ]
        );
    }

    #[test]
    fn test_tail_lines() {
        let lines: Vec<String> = (1..=5).map(|i| i.to_string()).collect();
        assert_eq!(tail_lines(lines.clone(), Some(2)), vec!["4", "5"]);
        assert_eq!(tail_lines(lines.clone(), Some(10)).len(), 5);
        assert_eq!(tail_lines(lines.clone(), Some(0)).len(), 0);
        assert_eq!(tail_lines(lines, None).len(), 5);
    }
}
