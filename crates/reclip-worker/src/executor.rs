//! Job executor.
//!
//! Pulls job ids from the queue and runs each delivery through
//! [`JobExecutor::process_delivery`]: load the record, claim it, stage the
//! uploads, render, record the outcome, ack. The store's atomic claim is
//! what turns the queue's at-least-once delivery into a single execution.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reclip_media::{ProgressReporter, RenderRequest, Renderer};
use reclip_models::{Job, JobId, JobStatus, Summary};
use reclip_queue::{Delivery, JobQueue};
use reclip_storage::layout::to_relative_posix;
use reclip_storage::{ClaimOutcome, JobLayout, JobStore, Packager};
use serde_json::Value;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::reporter::JobReporter;
use crate::staging::Stager;

/// Summary key holding the machine-readable failure code.
pub const SUMMARY_ERROR_CODE: &str = "error_code";

/// Maximum deliveries requested from the queue in one call.
const MAX_BATCH: usize = 5;

/// Collaborators shared by every job task.
pub struct WorkerContext {
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<dyn JobQueue>,
    pub renderer: Arc<dyn Renderer>,
    pub stager: Stager,
    pub layout: JobLayout,
    pub packager: Arc<Packager>,
}

/// What happened to one delivered job id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Finished,
    Failed,
    /// Another delivery already claimed the job, or it is terminal.
    Skipped(JobStatus),
    /// The job id is not in the store.
    Missing,
}

/// Job executor that processes jobs from the queue.
pub struct JobExecutor {
    config: WorkerConfig,
    ctx: Arc<WorkerContext>,
    job_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    /// Create a new job executor.
    pub fn new(config: WorkerConfig, ctx: WorkerContext) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            config,
            ctx: Arc::new(ctx),
            job_semaphore,
            shutdown,
            consumer_name,
        }
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Run until [`JobExecutor::shutdown`] is called, then wait (bounded by
    /// the shutdown timeout) for in-flight jobs.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting job executor '{}' with {} max concurrent jobs",
            self.consumer_name, self.config.max_concurrent_jobs
        );

        let mut shutdown_rx = self.shutdown.subscribe();
        if *shutdown_rx.borrow() {
            return Ok(());
        }

        // Periodically take over deliveries abandoned by dead consumers
        let ctx = Arc::clone(&self.ctx);
        let consumer_name = self.consumer_name.clone();
        let semaphore = Arc::clone(&self.job_semaphore);
        let claim_interval = self.config.claim_interval;
        let claim_min_idle = self.config.claim_min_idle;
        let package = self.config.package_on_finish;
        let mut shutdown_rx_claim = self.shutdown.subscribe();

        let claim_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(claim_interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx_claim.changed() => {
                        if *shutdown_rx_claim.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        match ctx.queue.claim_stale(&consumer_name, claim_min_idle, MAX_BATCH).await {
                            Ok(deliveries) if !deliveries.is_empty() => {
                                info!("Claimed {} stale deliveries", deliveries.len());
                                for delivery in deliveries {
                                    let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                                        break;
                                    };
                                    let ctx = Arc::clone(&ctx);
                                    tokio::spawn(async move {
                                        let _permit = permit;
                                        Self::execute_delivery(&ctx, package, delivery).await;
                                    });
                                }
                            }
                            Ok(_) => {}
                            Err(e) => {
                                warn!("Failed to claim stale deliveries: {}", e);
                            }
                        }
                    }
                }
            }
        });

        // Main job consumption loop
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_jobs() => {
                    if let Err(e) = result {
                        error!("Error consuming jobs: {}", e);
                        // Back off on error
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        claim_task.abort();

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                "Shutdown timeout reached with {} jobs still running",
                self.config.max_concurrent_jobs - self.job_semaphore.available_permits()
            );
        }

        info!("Job executor stopped");
        Ok(())
    }

    async fn consume_jobs(&self) -> WorkerResult<()> {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            // All slots busy, wait a bit
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let deliveries = self
            .ctx
            .queue
            .dequeue(&self.consumer_name, self.config.poll_block, available.min(MAX_BATCH))
            .await?;

        if deliveries.is_empty() {
            return Ok(());
        }

        debug!("Consumed {} deliveries from queue", deliveries.len());

        for delivery in deliveries {
            let ctx = Arc::clone(&self.ctx);
            let package = self.config.package_on_finish;
            let permit = Arc::clone(&self.job_semaphore)
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::config_error("job semaphore closed"))?;

            tokio::spawn(async move {
                let _permit = permit;
                Self::execute_delivery(&ctx, package, delivery).await;
            });
        }

        Ok(())
    }

    async fn wait_for_jobs(&self) {
        loop {
            let available = self.job_semaphore.available_permits();
            if available == self.config.max_concurrent_jobs {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Process one delivery and ack it, whatever the outcome.
    pub async fn process_delivery(&self, delivery: Delivery) -> JobOutcome {
        Self::execute_delivery(&self.ctx, self.config.package_on_finish, delivery).await
    }

    /// Process a job id without touching the queue.
    pub async fn process_job(&self, job_id: &JobId) -> WorkerResult<JobOutcome> {
        Self::process(&self.ctx, self.config.package_on_finish, job_id).await
    }

    async fn execute_delivery(ctx: &WorkerContext, package: bool, delivery: Delivery) -> JobOutcome {
        let job_id = delivery.job_id().clone();
        debug!(
            job_id = %job_id,
            attempt = delivery.attempt,
            "Executing delivery {}",
            delivery.message_id
        );

        let outcome = match Self::process(ctx, package, &job_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // Only store failures land here; the record may be stuck in
                // `running`, which is left for an operator to inspect.
                error!(job_id = %job_id, "Job processing error: {}", e);
                JobOutcome::Failed
            }
        };

        if let Err(e) = ctx.queue.ack(&delivery).await {
            error!(job_id = %job_id, "Failed to ack delivery {}: {}", delivery.message_id, e);
        }
        outcome
    }

    async fn process(ctx: &WorkerContext, package: bool, job_id: &JobId) -> WorkerResult<JobOutcome> {
        let job = match ctx.store.get(job_id).await {
            Ok(job) => job,
            Err(e) if e.is_not_found() => {
                warn!(job_id = %job_id, "Delivered job does not exist, dropping");
                return Ok(JobOutcome::Missing);
            }
            Err(e) => return Err(e.into()),
        };
        if job.status != JobStatus::Queued {
            debug!(job_id = %job_id, status = %job.status, "Job already claimed, skipping");
            return Ok(JobOutcome::Skipped(job.status));
        }

        let job = match ctx.store.claim(job_id).await? {
            ClaimOutcome::Claimed(job) => job,
            ClaimOutcome::NotClaimable(status) => {
                debug!(job_id = %job_id, status = %status, "Lost the claim, skipping");
                return Ok(JobOutcome::Skipped(status));
            }
        };

        let logger = JobLogger::new(&job.id, job.job_type);
        let span = logger.span();
        Self::run_claimed(ctx, package, job, logger).instrument(span).await
    }

    async fn run_claimed(
        ctx: &WorkerContext,
        package: bool,
        job: Job,
        logger: JobLogger,
    ) -> WorkerResult<JobOutcome> {
        let job_type = job.job_type.as_str();
        let scratch_dir = ctx.layout.work_dir(&job.id)?;
        logger.started(job.params.upload_ids().len());
        metrics::gauge!("reclip_jobs_in_flight").increment(1.0);

        let (reporter, handle) = JobReporter::spawn(Arc::clone(&ctx.store), job.id.clone());
        let rendered = Self::render(ctx, &job, &reporter).await;

        let result = match rendered {
            Ok((outputs, summary)) => {
                reporter.log(&format!("Done: {} outputs", outputs.len()));
                reporter.finish(handle).await;
                ctx.store
                    .finish(&job.id, outputs, summary)
                    .await
                    .map(|job| {
                        logger.finished(job.outputs.len());
                        JobOutcome::Finished
                    })
                    .map_err(WorkerError::from)
            }
            Err((e, summary)) => {
                let reason = e.to_string();
                reporter.log(&format!("ERROR: {}", reason));
                if let WorkerError::Render(media) = &e {
                    if let Some(tail) = media.stderr_tail(2000) {
                        reporter.log(&tail);
                    }
                }
                reporter.finish(handle).await;
                logger.failed(e.code(), &reason);
                Self::record_failure(ctx.store.as_ref(), &job.id, reason, e.code(), summary)
                    .await
                    .map(|_| JobOutcome::Failed)
            }
        };

        if let Err(e) = tokio::fs::remove_dir_all(&scratch_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                logger.warning(&format!("Failed to remove scratch dir: {}", e));
            }
        }

        metrics::gauge!("reclip_jobs_in_flight").decrement(1.0);
        let status = match &result {
            Ok(JobOutcome::Finished) => "finished",
            _ => "failed",
        };
        metrics::counter!("reclip_jobs_total", "job_type" => job_type, "status" => status).increment(1);
        metrics::histogram!("reclip_job_duration_seconds", "job_type" => job_type)
            .record(logger.elapsed().as_secs_f64());

        if package && result.as_ref().is_ok_and(|o| *o == JobOutcome::Finished) {
            Self::package(ctx, &job.id, &logger).await;
        }
        result
    }

    /// Stage, render and turn absolute outputs into job-relative paths.
    ///
    /// Errors carry whatever summary the render managed to produce.
    async fn render(
        ctx: &WorkerContext,
        job: &Job,
        reporter: &JobReporter,
    ) -> Result<(Vec<String>, Summary), (WorkerError, Summary)> {
        reporter.log("Staging inputs...");
        let render_job = ctx
            .stager
            .stage(&job.id, &job.params)
            .await
            .map_err(|e| (e, Summary::new()))?;

        let output_dir = ctx
            .layout
            .output_dir(&job.id)
            .map_err(|e| (WorkerError::from(e), Summary::new()))?;
        let scratch_dir = ctx
            .layout
            .work_dir(&job.id)
            .map_err(|e| (WorkerError::from(e), Summary::new()))?;

        reporter.log(&format!("Rendering {} job...", job.job_type));
        let request = RenderRequest {
            job_id: job.id.clone(),
            job: render_job,
            output_dir: output_dir.clone(),
            scratch_dir,
        };
        let output = ctx
            .renderer
            .render(request, reporter)
            .await
            .map_err(|e| (WorkerError::from(e), Summary::new()))?;

        let outputs = relative_outputs(&output_dir, &output.outputs);
        if outputs.is_empty() && output.items > 0 {
            let err = WorkerError::no_outputs(format!("all {} work items failed", output.items));
            return Err((err, output.summary));
        }
        Ok((outputs, output.summary))
    }

    async fn record_failure(
        store: &dyn JobStore,
        id: &JobId,
        reason: String,
        code: &'static str,
        summary: Summary,
    ) -> WorkerResult<()> {
        store
            .modify(
                id,
                Box::new(move |job| {
                    job.merge_summary(summary);
                    job.fail(reason)?;
                    let mut extra = Summary::new();
                    extra.insert(SUMMARY_ERROR_CODE.to_string(), Value::String(code.to_string()));
                    job.merge_summary(extra);
                    Ok(())
                }),
            )
            .await?;
        Ok(())
    }

    async fn package(ctx: &WorkerContext, id: &JobId, logger: &JobLogger) {
        match ctx.packager.ensure_all(id).await {
            Ok(paths) => logger.packaged(paths.len()),
            Err(e) => logger.warning(&format!("Eager packaging failed: {}", e)),
        }
    }
}

/// Job-relative POSIX paths for outputs under `output_dir`. Anything the
/// renderer left outside the output directory is dropped.
fn relative_outputs(output_dir: &Path, outputs: &[PathBuf]) -> Vec<String> {
    outputs
        .iter()
        .filter_map(|path| {
            let rel = to_relative_posix(output_dir, path);
            if rel.is_none() {
                warn!("Ignoring output outside the output directory: {}", path.display());
            }
            rel
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_outputs() {
        let base = Path::new("/data/jobs/abc/output");
        let outputs = vec![
            base.join("1").join("clip.mp4"),
            base.join("b_processed.mp4"),
            PathBuf::from("/tmp/elsewhere.mp4"),
        ];
        assert_eq!(
            relative_outputs(base, &outputs),
            vec!["1/clip.mp4".to_string(), "b_processed.mp4".to_string()]
        );
    }
}
