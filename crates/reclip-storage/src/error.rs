//! Storage error types.

use reclip_models::{ArchiveVariant, JobStatus, TransitionError};
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Upload not found: {0}")]
    UploadNotFound(String),

    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    #[error("Job already exists: {0}")]
    AlreadyExists(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Archive {variant} is not available for job {job_id} ({status})")]
    ArchiveNotReady {
        job_id: String,
        variant: ArchiveVariant,
        status: JobStatus,
    },

    #[error("Archive variant {variant} is not offered for job {job_id}")]
    UnsupportedVariant {
        job_id: String,
        variant: ArchiveVariant,
    },

    #[error("Job {0} finished without outputs")]
    NoOutputs(String),

    #[error("Archive build failed: {0}")]
    ArchiveFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl StorageError {
    pub fn job_not_found(id: impl Into<String>) -> Self {
        Self::JobNotFound(id.into())
    }

    pub fn upload_not_found(id: impl Into<String>) -> Self {
        Self::UploadNotFound(id.into())
    }

    pub fn invalid_id(id: impl Into<String>) -> Self {
        Self::InvalidId(id.into())
    }

    pub fn archive_failed(msg: impl Into<String>) -> Self {
        Self::ArchiveFailed(msg.into())
    }

    /// Whether the error means the referenced entity does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::JobNotFound(_) | Self::UploadNotFound(_) | Self::InvalidId(_)
        )
    }
}
