//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// The resource exists but cannot be served yet (job not finished,
    /// or finished without outputs).
    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Storage error: {0}")]
    Storage(#[from] reclip_storage::StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] reclip_queue::QueueError),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn not_ready(msg: impl Into<String>) -> Self {
        Self::NotReady(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::NotReady(_) => StatusCode::CONFLICT,
            ApiError::BadRequest(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) | ApiError::Storage(_) | ApiError::Queue(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn code(&self) -> Option<&'static str> {
        match self {
            ApiError::NotReady(_) => Some("not_ready"),
            ApiError::Validation(_) => Some("validation_error"),
            ApiError::NotFound(_) => Some("not_found"),
            _ => None,
        }
    }

    fn is_internal(&self) -> bool {
        matches!(
            self,
            ApiError::Internal(_) | ApiError::Storage(_) | ApiError::Queue(_)
        )
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Don't expose internal error details in production
        let detail = if self.is_internal()
            && std::env::var("ENVIRONMENT").unwrap_or_default() == "production"
        {
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            detail,
            code: self.code(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::not_found("job").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::not_ready("job").status_code(), StatusCode::CONFLICT);
        assert_eq!(ApiError::validation("crf").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::internal("boom").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_not_ready_code() {
        assert_eq!(ApiError::not_ready("x").code(), Some("not_ready"));
        assert_eq!(ApiError::internal("x").code(), None);
    }
}
