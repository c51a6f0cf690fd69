//! Job records and the job status machine.
//!
//! A job moves `queued -> running -> finished | failed`. Every transition
//! goes through a method on [`Job`] that refuses regressions, so stores only
//! ever persist records that passed the check.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::archive::ArchiveVariant;
use crate::params::JobParams;

/// Type-specific result metadata (counts, archive readiness flags, error).
pub type Summary = serde_json::Map<String, serde_json::Value>;

/// Summary key holding the failure reason of a failed job.
pub const SUMMARY_ERROR: &str = "error";

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID (32 lowercase hex chars).
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this ID is safe to use as a path component.
    pub fn is_valid(&self) -> bool {
        crate::upload::is_valid_id(&self.0)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Kind of job. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Pairwise concatenation of matched A/B clips
    Concat,
    /// UGC composition with overlays and captions
    Ugc,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Concat => "concat",
            JobType::Ugc => "ugc",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Submitted and waiting for a worker
    #[default]
    Queued,
    /// Claimed by exactly one worker
    Running,
    /// Render succeeded
    Finished,
    /// Render or parameter resolution failed
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Finished => "finished",
            JobStatus::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed)
    }

    /// Whether `self -> next` is a legal edge of the status machine.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Queued, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Finished)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected status change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal job transition {from} -> {to}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Work-item counters. Never decrease; `current <= total` once `total > 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub struct Progress {
    pub current: u32,
    pub total: u32,
}

impl Progress {
    /// Fold a new observation into the counters. Returns whether anything changed.
    pub fn advance(&mut self, current: u32, total: u32) -> bool {
        let mut next_total = self.total.max(total);
        let mut next_current = self.current.max(current);
        if next_total > 0 {
            next_total = next_total.max(self.current);
            next_current = next_current.min(next_total);
        }
        let changed = next_total != self.total || next_current != self.current;
        self.total = next_total;
        self.current = next_current;
        changed
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.current >= self.total
    }
}

/// One submitted unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    pub id: JobId,

    #[serde(rename = "type")]
    pub job_type: JobType,

    pub params: JobParams,

    #[serde(default)]
    pub status: JobStatus,

    #[serde(default)]
    pub progress: Progress,

    #[serde(default)]
    #[schemars(with = "std::collections::BTreeMap<String, serde_json::Value>")]
    pub summary: Summary,

    /// Paths relative to the job's output directory, set on `finished`
    #[serde(default)]
    pub outputs: Vec<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a queued job for the given parameters.
    pub fn new(params: JobParams) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            job_type: params.job_type(),
            params,
            status: JobStatus::Queued,
            progress: Progress::default(),
            summary: Summary::new(),
            outputs: Vec::new(),
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    fn transition(&mut self, to: JobStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(TransitionError {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// `queued -> running`.
    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.transition(JobStatus::Running)?;
        self.started_at = Some(self.updated_at);
        Ok(())
    }

    /// `running -> finished`, recording outputs and the final summary.
    ///
    /// Readiness flags for every archive variant of this job type are
    /// initialised to `false` unless already present.
    pub fn finish(&mut self, outputs: Vec<String>, summary: Summary) -> Result<(), TransitionError> {
        self.transition(JobStatus::Finished)?;
        self.outputs = outputs;
        self.summary.extend(summary);
        for variant in self.job_type.archive_variants() {
            self.summary
                .entry(variant.ready_key())
                .or_insert(serde_json::Value::Bool(false));
        }
        if self.progress.total > 0 {
            self.progress.current = self.progress.total;
        }
        self.finished_at = Some(self.updated_at);
        Ok(())
    }

    /// `queued | running -> failed`, keeping the reason in the summary.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Failed)?;
        self.summary
            .insert(SUMMARY_ERROR.to_string(), serde_json::Value::String(reason.into()));
        self.finished_at = Some(self.updated_at);
        Ok(())
    }

    /// Apply a progress report. Ignored unless the job is running.
    pub fn record_progress(&mut self, current: u32, total: u32) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        let changed = self.progress.advance(current, total);
        if changed {
            self.updated_at = Utc::now();
        }
        changed
    }

    /// Merge keys into the summary, overwriting existing ones.
    pub fn merge_summary(&mut self, summary: Summary) {
        if summary.is_empty() {
            return;
        }
        self.summary.extend(summary);
        self.updated_at = Utc::now();
    }

    /// Flip the readiness flag for an archive that now exists.
    pub fn mark_archive_ready(&mut self, variant: ArchiveVariant) {
        self.summary
            .insert(variant.ready_key().to_string(), serde_json::Value::Bool(true));
        self.updated_at = Utc::now();
    }

    pub fn is_archive_marked_ready(&self, variant: ArchiveVariant) -> bool {
        self.summary
            .get(variant.ready_key())
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Whether `path` is one of this job's recorded outputs.
    pub fn has_output(&self, path: &str) -> bool {
        self.status == JobStatus::Finished && self.outputs.iter().any(|o| o == path)
    }

    /// Failure reason, if the job failed.
    pub fn error(&self) -> Option<&str> {
        self.summary.get(SUMMARY_ERROR).and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{ConcatParams, UgcParams};
    use crate::upload::UploadId;
    use serde_json::json;

    fn concat_job() -> Job {
        Job::new(JobParams::Concat(ConcatParams::new(
            vec![UploadId::new()],
            vec![UploadId::new()],
        )))
    }

    #[test]
    fn test_job_creation() {
        let job = concat_job();
        assert_eq!(job.job_type, JobType::Concat);
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.outputs.is_empty());
        assert!(job.id.is_valid());
        assert_eq!(job.id.as_str().len(), 32);
    }

    #[test]
    fn test_job_state_transitions() {
        let mut job = concat_job();
        job.start().unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.started_at.is_some());

        job.finish(vec!["1/clip.mp4".into()], Summary::new()).unwrap();
        assert_eq!(job.status, JobStatus::Finished);
        assert_eq!(job.outputs, vec!["1/clip.mp4".to_string()]);
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn test_transitions_never_regress() {
        let mut job = concat_job();
        assert!(job.finish(vec![], Summary::new()).is_err());

        job.start().unwrap();
        let err = job.start().unwrap_err();
        assert_eq!(err.from, JobStatus::Running);
        assert_eq!(err.to, JobStatus::Running);

        job.fail("boom").unwrap();
        assert!(job.start().is_err());
        assert!(job.finish(vec![], Summary::new()).is_err());
        assert!(job.fail("again").is_err());
        assert_eq!(job.error(), Some("boom"));
    }

    #[test]
    fn test_queued_job_can_fail_directly() {
        let mut job = concat_job();
        job.fail("upload vanished").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.started_at.is_none());
    }

    #[test]
    fn test_finish_initialises_readiness_flags() {
        let mut job = concat_job();
        job.start().unwrap();
        let mut summary = Summary::new();
        summary.insert("success".into(), json!(2));
        job.finish(vec!["1/a.mp4".into(), "2/b.mp4".into()], summary).unwrap();

        assert_eq!(job.summary["flat_zip_ready"], json!(false));
        assert_eq!(job.summary["nested_zip_ready"], json!(false));
        assert_eq!(job.summary["success"], json!(2));

        job.mark_archive_ready(ArchiveVariant::Flat);
        assert!(job.is_archive_marked_ready(ArchiveVariant::Flat));
        assert!(!job.is_archive_marked_ready(ArchiveVariant::Nested));
    }

    #[test]
    fn test_ugc_finish_flags() {
        let mut job = Job::new(JobParams::Ugc(UgcParams::new(vec![UploadId::new()])));
        job.start().unwrap();
        job.finish(vec!["ugc/a_processed.mp4".into()], Summary::new()).unwrap();
        assert_eq!(job.summary["zip_ready"], json!(false));
        assert!(!job.summary.contains_key("flat_zip_ready"));
    }

    #[test]
    fn test_progress_monotonic_and_bounded() {
        let mut progress = Progress::default();
        assert!(progress.advance(0, 3));
        assert!(progress.advance(2, 3));
        assert!(!progress.advance(1, 3));
        assert_eq!(progress.current, 2);

        progress.advance(9, 3);
        assert_eq!(progress.current, 3);
        assert!(progress.is_complete());

        progress.advance(3, 1);
        assert_eq!(progress.total, 3);
        assert_eq!(progress.current, 3);
    }

    #[test]
    fn test_progress_before_total_known() {
        let mut progress = Progress::default();
        progress.advance(4, 0);
        assert_eq!(progress.current, 4);
        progress.advance(4, 2);
        assert_eq!(progress.total, 4);
        assert_eq!(progress.current, 4);
    }

    #[test]
    fn test_record_progress_only_while_running() {
        let mut job = concat_job();
        assert!(!job.record_progress(1, 2));
        job.start().unwrap();
        assert!(job.record_progress(1, 2));
        job.finish(vec!["x.mp4".into()], Summary::new()).unwrap();
        assert_eq!(job.progress, Progress { current: 2, total: 2 });
        assert!(!job.record_progress(1, 5));
    }

    #[test]
    fn test_has_output_requires_finished() {
        let mut job = concat_job();
        job.outputs = vec!["1/a.mp4".into()];
        assert!(!job.has_output("1/a.mp4"));

        let mut job = concat_job();
        job.start().unwrap();
        job.finish(vec!["1/a.mp4".into()], Summary::new()).unwrap();
        assert!(job.has_output("1/a.mp4"));
        assert!(!job.has_output("1/../1/a.mp4"));
        assert!(!job.has_output("2/a.mp4"));
    }

    #[test]
    fn test_job_json_shape() {
        let job = concat_job();
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["type"], "concat");
        assert_eq!(value["status"], "queued");
        assert_eq!(value["progress"], json!({"current": 0, "total": 0}));
        let back: Job = serde_json::from_value(value).unwrap();
        assert_eq!(back, job);
    }
}
