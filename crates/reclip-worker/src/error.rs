//! Worker error types.

use reclip_media::MediaError;
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// A referenced upload could not be resolved or staged.
    #[error("Parameter resolution failed: {0}")]
    ParameterResolution(String),

    /// The render produced no outputs although it had work to do.
    #[error("Render produced no outputs: {0}")]
    NoOutputs(String),

    #[error("Render failed: {0}")]
    Render(#[from] MediaError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    Storage(#[from] reclip_storage::StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] reclip_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn parameter_resolution(msg: impl Into<String>) -> Self {
        Self::ParameterResolution(msg.into())
    }

    pub fn no_outputs(msg: impl Into<String>) -> Self {
        Self::NoOutputs(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Machine-readable code stored next to the failure reason.
    pub fn code(&self) -> &'static str {
        match self {
            WorkerError::ParameterResolution(_) => "parameter_resolution",
            WorkerError::NoOutputs(_) => "no_outputs",
            WorkerError::Render(e) => e.code(),
            WorkerError::ConfigError(_) => "config_error",
            WorkerError::Storage(_) | WorkerError::Io(_) => "storage_error",
            WorkerError::Queue(_) => "queue_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(
            WorkerError::parameter_resolution("upload x").code(),
            "parameter_resolution"
        );
        assert_eq!(WorkerError::Render(MediaError::MissingApiKey).code(), "missing_api_key");
    }
}
