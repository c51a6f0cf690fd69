//! Prometheus metrics for the API server.

use std::sync::OnceLock;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use regex_lite::{Captures, Regex};

/// Install the Prometheus recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "reclip_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "reclip_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "reclip_http_requests_in_flight";

    // Job metrics
    pub const JOBS_SUBMITTED_TOTAL: &str = "reclip_jobs_submitted_total";
    pub const QUEUE_LENGTH: &str = "reclip_queue_length";

    // Files
    pub const UPLOADS_TOTAL: &str = "reclip_uploads_total";
    pub const UPLOAD_BYTES_TOTAL: &str = "reclip_upload_bytes_total";
    pub const ARCHIVE_DOWNLOADS_TOTAL: &str = "reclip_archive_downloads_total";

    // Rate limiting metrics
    pub const RATE_LIMIT_HITS_TOTAL: &str = "reclip_rate_limit_hits_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_job_submitted(job_type: &str) {
    let labels = [("type", job_type.to_string())];
    counter!(names::JOBS_SUBMITTED_TOTAL, &labels).increment(1);
}

pub fn set_queue_length(length: u64) {
    gauge!(names::QUEUE_LENGTH).set(length as f64);
}

pub fn record_upload(bytes: u64) {
    counter!(names::UPLOADS_TOTAL).increment(1);
    counter!(names::UPLOAD_BYTES_TOTAL).increment(bytes);
}

pub fn record_archive_download(variant: &str) {
    let labels = [("variant", variant.to_string())];
    counter!(names::ARCHIVE_DOWNLOADS_TOTAL, &labels).increment(1);
}

pub fn record_rate_limit_hit(endpoint: &str) {
    let labels = [("endpoint", sanitize_path(endpoint))];
    counter!(names::RATE_LIMIT_HITS_TOTAL, &labels).increment(1);
}

fn job_id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/jobs/([A-Za-z0-9-]+)").expect("static regex is valid"))
}

/// Collapse job ids and download paths so label cardinality stays bounded.
fn sanitize_path(path: &str) -> String {
    let path = job_id_pattern().replace_all(path, |caps: &Captures| match &caps[1] {
        "concat" | "ugc" => caps[0].to_string(),
        _ => "/jobs/:id".to_string(),
    });
    match path.find("/download/") {
        Some(idx) => format!("{}/download/:path", &path[..idx]),
        None => path.into_owned(),
    }
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
    let response = next.run(request).await;
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    record_http_request(&method, &path, response.status().as_u16(), start.elapsed().as_secs_f64());

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(
            sanitize_path("/api/jobs/0f9c2d4e6a8b4c1d9e7f5a3b2c1d0e9f/logs"),
            "/api/jobs/:id/logs"
        );
        assert_eq!(
            sanitize_path("/api/jobs/0f9c2d4e6a8b4c1d9e7f5a3b2c1d0e9f/download/1/clip.mp4"),
            "/api/jobs/:id/download/:path"
        );
        assert_eq!(sanitize_path("/api/jobs/concat"), "/api/jobs/concat");
        assert_eq!(sanitize_path("/health"), "/health");
    }
}
