//! Job service: the query and download façade behind the HTTP handlers.
//!
//! Submission validates parameters, checks every referenced upload, creates
//! the `queued` record and only then enqueues it. Reads never mutate a job
//! except for the lazy archive build, which flips a readiness flag once the
//! archive exists.

use std::path::PathBuf;
use std::sync::Arc;

use reclip_models::archive::UnknownVariant;
use reclip_models::{ArchiveVariant, ConcatParams, Job, JobId, JobParams, UgcParams, Upload};
use reclip_queue::JobQueue;
use reclip_storage::{JobLayout, JobStore, Packager, StorageError, UploadStore};
use tokio::io::AsyncRead;
use tracing::{error, info};

use crate::error::{ApiError, ApiResult};
use crate::metrics;

/// Façade over the upload store, job store, queue and packager.
pub struct JobService {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
    uploads: UploadStore,
    layout: JobLayout,
    packager: Arc<Packager>,
}

impl JobService {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn JobQueue>,
        uploads: UploadStore,
        layout: JobLayout,
    ) -> Self {
        let packager = Arc::new(Packager::new(layout.clone(), Arc::clone(&store)));
        Self {
            store,
            queue,
            uploads,
            layout,
            packager,
        }
    }

    pub fn store(&self) -> Arc<dyn JobStore> {
        Arc::clone(&self.store)
    }

    pub fn queue(&self) -> Arc<dyn JobQueue> {
        Arc::clone(&self.queue)
    }

    pub fn uploads(&self) -> &UploadStore {
        &self.uploads
    }

    pub fn layout(&self) -> &JobLayout {
        &self.layout
    }

    /// Shared with embedded workers so eager and lazy packaging use the
    /// same per-archive locks.
    pub fn packager(&self) -> Arc<Packager> {
        Arc::clone(&self.packager)
    }

    /// Persist one uploaded file.
    pub async fn upload<R>(&self, reader: &mut R, name: &str, role: Option<String>) -> ApiResult<Upload>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let upload = self.uploads.store_reader(reader, name, role).await?;
        metrics::record_upload(upload.size);
        Ok(upload)
    }

    pub async fn submit_concat(&self, params: ConcatParams) -> ApiResult<Job> {
        self.submit(JobParams::Concat(params)).await
    }

    pub async fn submit_ugc(&self, params: UgcParams) -> ApiResult<Job> {
        self.submit(JobParams::Ugc(params)).await
    }

    /// Validate, create the `queued` record, enqueue.
    ///
    /// Nothing is created when validation fails. If the enqueue fails the
    /// record is moved to `failed` so it does not sit in `queued` forever.
    pub async fn submit(&self, params: JobParams) -> ApiResult<Job> {
        params
            .validate()
            .map_err(|e| ApiError::validation(e.to_string()))?;

        for id in params.upload_ids() {
            if !id.is_valid() {
                return Err(ApiError::validation(format!("invalid upload id: {}", id)));
            }
        }
        match self.uploads.resolve_all(params.upload_ids()).await {
            Ok(_) => {}
            Err(StorageError::UploadNotFound(id)) => {
                return Err(ApiError::validation(format!("upload {} does not exist", id)));
            }
            Err(e) => return Err(e.into()),
        }

        let job = Job::new(params);
        self.store.create(&job).await?;

        if let Err(e) = self.queue.enqueue(&job.id, job.job_type).await {
            error!(job_id = %job.id, "Failed to enqueue job: {}", e);
            if let Err(fail_err) = self
                .store
                .fail(&job.id, format!("enqueue failed: {}", e))
                .await
            {
                error!(job_id = %job.id, "Failed to mark unqueued job as failed: {}", fail_err);
            }
            return Err(ApiError::internal(format!("failed to enqueue job: {}", e)));
        }

        metrics::record_job_submitted(job.job_type.as_str());
        info!(job_id = %job.id, job_type = %job.job_type, "Job submitted");
        Ok(job)
    }

    pub async fn get_job(&self, id: &JobId) -> ApiResult<Job> {
        self.store.get(id).await.map_err(lookup_error)
    }

    /// Job log text, the last `tail` lines of it when given.
    pub async fn get_logs(&self, id: &JobId, tail: Option<usize>) -> ApiResult<String> {
        let lines = self.store.logs(id, tail).await.map_err(lookup_error)?;
        Ok(join_log_lines(&lines))
    }

    /// Absolute path of one output. `NotFound` unless the job finished and
    /// `path` is one of its recorded outputs.
    pub async fn output_path(&self, id: &JobId, path: &str) -> ApiResult<PathBuf> {
        let job = self.get_job(id).await?;
        if !job.has_output(path) {
            return Err(ApiError::not_found(format!("output {} not found", path)));
        }
        let file = self
            .layout
            .output_file(id, path)
            .map_err(lookup_error)?
            .ok_or_else(|| ApiError::not_found(format!("output {} not found", path)))?;
        if !tokio::fs::try_exists(&file).await.map_err(StorageError::from)? {
            return Err(ApiError::not_found(format!("output {} not found", path)));
        }
        Ok(file)
    }

    /// Archive for `(id, variant)`, built on first request.
    ///
    /// Returns the archive path and the file name offered to clients.
    /// Unknown jobs and variants the job type does not offer are
    /// `NotFound`; jobs that are not finished, or finished without
    /// outputs, are `NotReady`.
    pub async fn archive(&self, id: &JobId, variant: Option<&str>) -> ApiResult<(PathBuf, String)> {
        let variant: ArchiveVariant = variant
            .unwrap_or_default()
            .parse()
            .map_err(|e: UnknownVariant| ApiError::not_found(e.to_string()))?;

        let path = self.packager.ensure(id, variant).await.map_err(|e| match e {
            StorageError::ArchiveNotReady { .. } | StorageError::NoOutputs(_) => {
                ApiError::not_ready(e.to_string())
            }
            StorageError::UnsupportedVariant { .. } => ApiError::not_found(e.to_string()),
            other => lookup_error(other),
        })?;
        metrics::record_archive_download(variant.as_str());
        Ok((path, variant.download_name(id.as_str())))
    }
}

/// One string, every line terminated by a newline.
fn join_log_lines(lines: &[String]) -> String {
    let mut text = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
    for line in lines {
        text.push_str(line);
        text.push('\n');
    }
    text
}

fn lookup_error(err: StorageError) -> ApiError {
    if err.is_not_found() {
        ApiError::not_found(err.to_string())
    } else {
        ApiError::Storage(err)
    }
}
