//! API middleware.

use std::collections::HashMap;
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::{Method, Request, Response};
use axum::middleware::Next;
use axum::response::IntoResponse;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn, Span};
use uuid::Uuid;

use crate::error::ApiError;
use crate::metrics;

/// Per-IP rate limiter using governor.
pub type IpRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Upper bound on tracked client IPs.
const MAX_RATE_LIMITER_ENTRIES: usize = 10_000;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// IP-based rate limiter cache with automatic cleanup.
#[derive(Clone)]
pub struct RateLimiterCache {
    limiters: Arc<RwLock<HashMap<IpAddr, (Arc<IpRateLimiter>, Instant)>>>,
    quota: Quota,
    ttl: Duration,
}

impl RateLimiterCache {
    pub fn new(requests_per_second: u32) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
        Self {
            limiters: Arc::new(RwLock::new(HashMap::new())),
            quota,
            ttl: Duration::from_secs(3600),
        }
    }

    async fn cleanup_expired(&self) {
        let mut limiters = self.limiters.write().await;
        let now = Instant::now();
        limiters.retain(|_, (_, created_at)| now.duration_since(*created_at) < self.ttl);

        // Still over capacity: evict the oldest entries
        if limiters.len() >= MAX_RATE_LIMITER_ENTRIES {
            let mut entries: Vec<_> = limiters.iter().map(|(ip, (_, t))| (*ip, *t)).collect();
            entries.sort_by_key(|(_, t)| *t);

            let to_remove = limiters.len() + 1 - MAX_RATE_LIMITER_ENTRIES;
            for (ip, _) in entries.into_iter().take(to_remove) {
                limiters.remove(&ip);
            }
            warn!("Rate limiter cache exceeded capacity, removed {} entries", to_remove);
        }
    }

    /// Get or create a rate limiter for an IP.
    pub async fn get_limiter(&self, ip: IpAddr) -> Arc<IpRateLimiter> {
        {
            let limiters = self.limiters.read().await;
            if let Some((limiter, _)) = limiters.get(&ip) {
                return Arc::clone(limiter);
            }
        }

        if self.limiters.read().await.len() >= MAX_RATE_LIMITER_ENTRIES {
            self.cleanup_expired().await;
        }

        let mut limiters = self.limiters.write().await;
        // Another request may have inserted it meanwhile
        if let Some((limiter, _)) = limiters.get(&ip) {
            return Arc::clone(limiter);
        }
        let limiter = Arc::new(RateLimiter::direct(self.quota));
        limiters.insert(ip, (Arc::clone(&limiter), Instant::now()));
        limiter
    }

    pub async fn check(&self, ip: IpAddr) -> bool {
        self.get_limiter(ip).await.check().is_ok()
    }

    pub async fn tracked(&self) -> usize {
        self.limiters.read().await.len()
    }
}

/// CORS layer. A `*` entry allows any origin without credentials.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers(Any)
            .allow_origin(Any)
            .max_age(Duration::from_secs(600));
    }

    // tower-http rejects credentials combined with wildcard headers
    let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT, header::ORIGIN])
        .expose_headers([
            header::CONTENT_LENGTH,
            header::CONTENT_TYPE,
            header::CONTENT_DISPOSITION,
        ])
        .allow_credentials(true)
        .allow_origin(origins)
        .max_age(Duration::from_secs(600))
}

const SECURITY_HEADERS: &[(&str, &str)] = &[
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("strict-transport-security", "max-age=31536000; includeSubDomains"),
    ("referrer-policy", "strict-origin-when-cross-origin"),
    ("cross-origin-resource-policy", "same-origin"),
    ("x-permitted-cross-domain-policies", "none"),
];

/// Security headers middleware.
pub async fn security_headers(request: Request<Body>, next: Next) -> Response<Body> {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    for &(name, value) in SECURITY_HEADERS {
        headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }
    response
}

/// Request ID middleware. Reuses an incoming `X-Request-ID` when present.
pub async fn request_id(mut request: Request<Body>, next: Next) -> Response<Body> {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty() && s.len() <= 128)
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(request_id.clone());
    Span::current().record("request_id", request_id.as_str());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Request logging middleware.
pub async fn request_logging(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    // Probes are noise
    if !matches!(uri.path(), "/health" | "/ready" | "/metrics") {
        info!(
            method = %method,
            uri = %uri,
            status = %response.status(),
            duration_ms = %start.elapsed().as_millis(),
            "Request completed"
        );
    }

    response
}

/// Per-IP rate limiting. Requests without a resolvable client IP pass.
pub async fn rate_limit_middleware(
    State(rate_limiter): State<Arc<RateLimiterCache>>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    if let Some(ip) = extract_client_ip(&request) {
        if !rate_limiter.check(ip).await {
            warn!(ip = %ip, "Rate limit exceeded");
            metrics::record_rate_limit_hit(request.uri().path());
            let mut response = ApiError::RateLimited.into_response();
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
            return response;
        }
    }

    next.run(request).await
}

/// Client IP from proxy headers, falling back to the connection address.
fn extract_client_ip(request: &Request<Body>) -> Option<IpAddr> {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse().ok());
    if forwarded.is_some() {
        return forwarded;
    }

    let real_ip = request
        .headers()
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok());
    if real_ip.is_some() {
        return real_ip;
    }

    request
        .extensions()
        .get::<ConnectInfo<std::net::SocketAddr>>()
        .map(|ci| ci.0.ip())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rate_limiter_blocks_after_quota() {
        let cache = RateLimiterCache::new(2);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(cache.check(ip).await);
        assert!(cache.check(ip).await);
        assert!(!cache.check(ip).await);

        // Other clients have their own budget
        assert!(cache.check("10.0.0.2".parse().unwrap()).await);
        assert_eq!(cache.tracked().await, 2);
    }

    #[test]
    fn test_extract_client_ip_prefers_forwarded_for() {
        let request = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .header("x-real-ip", "198.51.100.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_client_ip(&request), Some("203.0.113.7".parse().unwrap()));

        let request = Request::builder()
            .header("x-real-ip", "198.51.100.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_client_ip(&request), Some("198.51.100.1".parse().unwrap()));

        let request = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(extract_client_ip(&request), None);
    }
}
