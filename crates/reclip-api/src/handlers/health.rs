//! Health check handlers.

use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::metrics;
use crate::state::AppState;

/// Health response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

/// Health check endpoint (liveness probe).
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub checks: ReadinessChecks,
}

#[derive(Serialize)]
pub struct ReadinessChecks {
    pub queue: CheckStatus,
    pub storage: CheckStatus,
}

#[derive(Serialize)]
pub struct CheckStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl CheckStatus {
    fn ok(start: Instant) -> Self {
        Self {
            status: "ok".to_string(),
            error: None,
            latency_ms: Some(start.elapsed().as_millis() as u64),
        }
    }

    fn error(msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            error: Some(msg.into()),
            latency_ms: None,
        }
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Readiness check endpoint (readiness probe).
/// Checks the queue backend and the data directories.
pub async fn ready(
    State(state): State<AppState>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    let queue = state.service.queue();
    let queue_check = {
        let start = Instant::now();
        match queue.ping().await {
            Ok(()) => {
                if let Ok(len) = queue.len().await {
                    metrics::set_queue_length(len);
                }
                CheckStatus::ok(start)
            }
            Err(e) => CheckStatus::error(e.to_string()),
        }
    };

    let storage_check = {
        let start = Instant::now();
        let jobs = state.service.layout().root();
        let uploads = state.service.uploads().dir();
        match (
            tokio::fs::metadata(jobs).await,
            tokio::fs::metadata(uploads).await,
        ) {
            (Ok(a), Ok(b)) if a.is_dir() && b.is_dir() => CheckStatus::ok(start),
            (Err(e), _) | (_, Err(e)) => CheckStatus::error(e.to_string()),
            _ => CheckStatus::error("data path is not a directory"),
        }
    };

    let all_ok = queue_check.is_ok() && storage_check.is_ok();
    let response = ReadinessResponse {
        status: if all_ok { "ready" } else { "degraded" }.to_string(),
        checks: ReadinessChecks {
            queue: queue_check,
            storage: storage_check,
        },
    };

    if all_ok {
        Ok(Json(response))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(response)))
    }
}
