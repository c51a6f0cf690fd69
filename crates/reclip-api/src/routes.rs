//! API routes.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;

use crate::handlers::{
    download_archive, download_archive_variant, download_output, get_job, get_job_logs, health,
    ready, submit_concat, submit_ugc, upload_file,
};
use crate::metrics::metrics_middleware;
use crate::middleware::{
    cors_layer, rate_limit_middleware, request_id, request_logging, security_headers,
    RateLimiterCache,
};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let job_routes = Router::new()
        .route("/jobs/concat", post(submit_concat))
        .route("/jobs/ugc", post(submit_ugc))
        .route("/jobs/:job_id", get(get_job))
        .route("/jobs/:job_id/logs", get(get_job_logs))
        .route("/jobs/:job_id/download/*path", get(download_output))
        .route("/jobs/:job_id/download-zip", get(download_archive))
        .route("/jobs/:job_id/download-zip/:variant", get(download_archive_variant));

    let rate_limiter = Arc::new(RateLimiterCache::new(state.config.rate_limit_rps));

    let api_routes = Router::new()
        .route("/uploads", post(upload_file))
        .merge(job_routes)
        .layer(middleware::from_fn_with_state(rate_limiter, rate_limit_middleware));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready));

    let metrics_routes = match metrics_handle {
        Some(handle) => Router::new().route("/metrics", get(move || async move { handle.render() })),
        None => Router::new(),
    };

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        // Uploads are bounded by the configured limit instead of axum's 2MB default
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
