//! Structured job lifecycle logging.
//!
//! Process logs only; the user-facing log lines of a job go through the
//! reporter into the job store.

use std::time::{Duration, Instant};

use reclip_models::{JobId, JobType};
use tracing::{error, info, warn, Span};

/// Lifecycle events for one claimed job, each tagged with the job id, job
/// type and time since the claim.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: JobId,
    job_type: JobType,
    claimed_at: Instant,
}

impl JobLogger {
    pub fn new(job_id: &JobId, job_type: JobType) -> Self {
        Self {
            job_id: job_id.clone(),
            job_type,
            claimed_at: Instant::now(),
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    /// Time since the job was claimed.
    pub fn elapsed(&self) -> Duration {
        self.claimed_at.elapsed()
    }

    pub fn started(&self, uploads: usize) {
        info!(
            job_id = %self.job_id,
            job_type = self.job_type.as_str(),
            uploads,
            "Job started"
        );
    }

    pub fn finished(&self, outputs: usize) {
        info!(
            job_id = %self.job_id,
            job_type = self.job_type.as_str(),
            outputs,
            elapsed_ms = self.elapsed().as_millis() as u64,
            "Job finished"
        );
    }

    pub fn failed(&self, code: &str, reason: &str) {
        error!(
            job_id = %self.job_id,
            job_type = self.job_type.as_str(),
            error_code = code,
            elapsed_ms = self.elapsed().as_millis() as u64,
            "Job failed: {}", reason
        );
    }

    pub fn packaged(&self, archives: usize) {
        info!(job_id = %self.job_id, archives, "Archives packaged");
    }

    pub fn warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            job_type = self.job_type.as_str(),
            "{}", message
        );
    }

    /// Span wrapping everything done for this job.
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            job_type = self.job_type.as_str()
        )
    }
}
