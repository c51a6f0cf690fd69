//! Axum HTTP API server.
//!
//! This crate provides:
//! - Upload intake and job submission
//! - Job status, logs and output downloads
//! - Lazily built zip archives per job
//! - Rate limiting, security headers and Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod service;
pub mod state;

pub use config::{ApiConfig, QueueBackend};
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use service::JobService;
pub use state::AppState;
