//! Upload store.
//!
//! Each upload is two files under the uploads directory:
//! `<id>__<sanitized name>` with the bytes and `<id>.json` with its metadata.
//! Uploads are immutable; nothing here deletes them.

use std::path::{Path, PathBuf};

use chrono::Utc;
use reclip_models::{sanitize_filename, Upload, UploadId};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::fs_utils::{link_or_copy, temp_sibling, unique_path, write_atomic};

/// Persists uploaded files and resolves ids back to paths.
#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn meta_path(&self, id: &UploadId) -> PathBuf {
        self.dir.join(format!("{}.json", id.as_str()))
    }

    /// Store an in-memory upload.
    pub async fn store(
        &self,
        bytes: &[u8],
        original_name: &str,
        role: Option<String>,
    ) -> StorageResult<Upload> {
        let mut reader = bytes;
        self.store_reader(&mut reader, original_name, role).await
    }

    /// Stream an upload to disk. The metadata file is written last, so an
    /// upload only resolves once its bytes are complete.
    pub async fn store_reader<R>(
        &self,
        reader: &mut R,
        original_name: &str,
        role: Option<String>,
    ) -> StorageResult<Upload>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        fs::create_dir_all(&self.dir).await?;

        let id = UploadId::new();
        let original_name = if original_name.trim().is_empty() {
            "upload".to_string()
        } else {
            original_name.to_string()
        };
        let stored_path = self
            .dir
            .join(format!("{}__{}", id.as_str(), sanitize_filename(&original_name)));

        let tmp = temp_sibling(&stored_path);
        let size = match write_stream(&tmp, reader).await {
            Ok(size) => size,
            Err(e) => {
                let _ = fs::remove_file(&tmp).await;
                return Err(e.into());
            }
        };
        fs::rename(&tmp, &stored_path).await?;

        let upload = Upload {
            id,
            original_name,
            stored_path,
            size,
            role: role.filter(|r| !r.trim().is_empty()),
            created_at: Utc::now(),
        };

        let meta = serde_json::to_vec_pretty(&upload)?;
        write_atomic(&self.meta_path(&upload.id), &meta).await?;

        info!(
            upload_id = %upload.id,
            size = upload.size,
            "Stored upload {}",
            upload.original_name
        );
        Ok(upload)
    }

    /// Resolve an id to its upload. Missing metadata or bytes are `UploadNotFound`.
    pub async fn resolve(&self, id: &UploadId) -> StorageResult<Upload> {
        if !id.is_valid() {
            return Err(StorageError::upload_not_found(id.as_str()));
        }

        let raw = match fs::read(self.meta_path(id)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::upload_not_found(id.as_str()));
            }
            Err(e) => return Err(e.into()),
        };
        let upload: Upload = serde_json::from_slice(&raw)?;

        if !fs::try_exists(&upload.stored_path).await? {
            return Err(StorageError::upload_not_found(id.as_str()));
        }
        Ok(upload)
    }

    /// Resolve every id, failing on the first one that does not exist.
    pub async fn resolve_all<'a, I>(&self, ids: I) -> StorageResult<Vec<Upload>>
    where
        I: IntoIterator<Item = &'a UploadId>,
    {
        let mut uploads = Vec::new();
        for id in ids {
            uploads.push(self.resolve(id).await?);
        }
        Ok(uploads)
    }

    /// Link (or copy) an upload into `dest_dir` under its sanitized name.
    ///
    /// Name collisions inside `dest_dir` get a numeric suffix, so two
    /// uploads called `clip.mp4` both survive staging.
    pub async fn stage(&self, id: &UploadId, dest_dir: &Path) -> StorageResult<PathBuf> {
        let upload = self.resolve(id).await?;
        fs::create_dir_all(dest_dir).await?;

        let dest = unique_path(dest_dir, &upload.safe_name()).await?;
        link_or_copy(&upload.stored_path, &dest).await?;

        debug!(upload_id = %id, "Staged upload to {}", dest.display());
        Ok(dest)
    }
}

async fn write_stream<R>(path: &Path, reader: &mut R) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut file = fs::File::create(path).await?;
    let size = tokio::io::copy(reader, &mut file).await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(size)
}
