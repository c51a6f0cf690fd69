//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors raised while rendering a job.
///
/// Per-item failures (one pair or one clip) are logged and counted by the
/// renderers; only errors that abort the whole job surface as `MediaError`.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid video file: {0}")]
    InvalidVideo(String),

    #[error("Caption provider API key missing; set ASSEMBLYAI_API_KEY or pass api_key")]
    MissingApiKey,

    #[error("Transcription failed: {0}")]
    Transcription(String),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    pub fn transcription(message: impl Into<String>) -> Self {
        Self::Transcription(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Short machine-readable code recorded next to the job's error message.
    pub fn code(&self) -> &'static str {
        match self {
            MediaError::FfmpegNotFound => "ffmpeg_not_found",
            MediaError::FfprobeNotFound => "ffprobe_not_found",
            MediaError::MissingApiKey => "missing_api_key",
            MediaError::FfmpegFailed { .. } | MediaError::FfprobeFailed { .. } => "ffmpeg_failed",
            MediaError::Transcription(_) | MediaError::Http(_) => "transcription_failed",
            MediaError::Timeout(_) => "timeout",
            _ => "render_failed",
        }
    }

    /// Tail of FFmpeg's stderr, trimmed for log output.
    pub fn stderr_tail(&self, max_chars: usize) -> Option<String> {
        match self {
            MediaError::FfmpegFailed { stderr: Some(s), .. }
            | MediaError::FfprobeFailed { stderr: Some(s), .. } => {
                let skip = s.chars().count().saturating_sub(max_chars);
                Some(s.chars().skip(skip).collect())
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(MediaError::MissingApiKey.code(), "missing_api_key");
        assert_eq!(MediaError::FfmpegNotFound.code(), "ffmpeg_not_found");
        assert_eq!(MediaError::internal("x").code(), "render_failed");
    }

    #[test]
    fn test_stderr_tail() {
        let err = MediaError::ffmpeg_failed("boom", Some("abcdef".into()), Some(1));
        assert_eq!(err.stderr_tail(3).as_deref(), Some("def"));
        assert_eq!(err.stderr_tail(100).as_deref(), Some("abcdef"));
        assert!(MediaError::MissingApiKey.stderr_tail(10).is_none());
    }
}
