//! Upload resolution and staging into a job's input directory.
//!
//! Layout under `<job_dir>/input`:
//! - concat: `a/` and `b/`
//! - ugc: `ugc/` for the main videos, `assets/` for overlay uploads

use std::path::{Path, PathBuf};

use reclip_media::RenderJob;
use reclip_models::{JobId, JobParams, UploadId};
use reclip_storage::{JobLayout, StorageError, UploadStore};
use tracing::debug;

use crate::error::{WorkerError, WorkerResult};

/// Default overlay file names looked up in the assets directory.
pub const DEFAULT_ADD1: &str = "add1.png";
pub const DEFAULT_ADD2: &str = "add2.mov";
pub const DEFAULT_CLIP_END: &str = "ClipEnd.mov";

/// Copies a job's uploads into its input directory.
#[derive(Debug, Clone)]
pub struct Stager {
    uploads: UploadStore,
    layout: JobLayout,
    assets_dir: PathBuf,
}

impl Stager {
    pub fn new(uploads: UploadStore, layout: JobLayout, assets_dir: impl Into<PathBuf>) -> Self {
        Self {
            uploads,
            layout,
            assets_dir: assets_dir.into(),
        }
    }

    /// Stage all uploads of `params` and describe the render input.
    pub async fn stage(&self, job_id: &JobId, params: &JobParams) -> WorkerResult<RenderJob> {
        let input = self.layout.input_dir(job_id)?;

        match params {
            JobParams::Concat(p) => {
                let files_a = self.stage_all(&p.files_a, &input.join("a")).await?;
                let files_b = self.stage_all(&p.files_b, &input.join("b")).await?;
                Ok(RenderJob::Concat {
                    params: p.clone(),
                    files_a,
                    files_b,
                })
            }
            JobParams::Ugc(p) => {
                let files = self.stage_all(&p.files, &input.join("ugc")).await?;
                let assets = input.join("assets");
                let add1 = self.stage_asset(p.add1_file.as_ref(), &assets, DEFAULT_ADD1).await?;
                let add2 = self.stage_asset(p.add2_file.as_ref(), &assets, DEFAULT_ADD2).await?;
                let clip_end = self
                    .stage_asset(p.clip_end_file.as_ref(), &assets, DEFAULT_CLIP_END)
                    .await?;
                Ok(RenderJob::Ugc {
                    params: p.clone(),
                    files,
                    add1,
                    add2,
                    clip_end,
                })
            }
        }
    }

    async fn stage_all(&self, ids: &[UploadId], dest: &Path) -> WorkerResult<Vec<PathBuf>> {
        let mut staged = Vec::with_capacity(ids.len());
        for id in ids {
            staged.push(self.uploads.stage(id, dest).await.map_err(resolution_error)?);
        }
        debug!("Staged {} uploads into {}", staged.len(), dest.display());
        Ok(staged)
    }

    /// An uploaded asset wins over the default one. A missing default is
    /// not an error; the layer is simply skipped.
    async fn stage_asset(
        &self,
        id: Option<&UploadId>,
        dest: &Path,
        default_name: &str,
    ) -> WorkerResult<Option<PathBuf>> {
        if let Some(id) = id {
            let path = self.uploads.stage(id, dest).await.map_err(resolution_error)?;
            return Ok(Some(path));
        }
        let fallback = self.assets_dir.join(default_name);
        if tokio::fs::try_exists(&fallback).await? {
            Ok(Some(fallback))
        } else {
            Ok(None)
        }
    }
}

fn resolution_error(err: StorageError) -> WorkerError {
    match err {
        StorageError::UploadNotFound(id) => {
            WorkerError::parameter_resolution(format!("upload {} does not exist", id))
        }
        other => WorkerError::Storage(other),
    }
}
