//! API configuration.

use std::str::FromStr;

/// Which queue backend the API publishes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueBackend {
    /// Redis Streams, shared with standalone workers
    Redis,
    /// In-process queue; only embedded workers can consume it
    Memory,
}

impl FromStr for QueueBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "redis" => Ok(QueueBackend::Redis),
            "memory" | "mem" => Ok(QueueBackend::Memory),
            other => Err(format!("unknown queue backend: {}", other)),
        }
    }
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Rate limit requests per second, per client IP
    pub rate_limit_rps: u32,
    /// Max request body size (uploads included)
    pub max_body_size: usize,
    /// Environment (development/production)
    pub environment: String,
    pub queue_backend: QueueBackend,
    /// Workers run inside the API process. Forced to at least one with the
    /// memory backend.
    pub embedded_workers: usize,
    pub metrics_enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            rate_limit_rps: 20,
            max_body_size: 2 * 1024 * 1024 * 1024, // 2GB
            environment: "development".to_string(),
            queue_backend: QueueBackend::Redis,
            embedded_workers: 0,
            metrics_enabled: true,
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let queue_backend = std::env::var("QUEUE_BACKEND")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.queue_backend);
        let embedded_workers = std::env::var("EMBEDDED_WORKERS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.embedded_workers);

        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            rate_limit_rps: std::env::var("RATE_LIMIT_RPS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.rate_limit_rps),
            max_body_size: std::env::var("MAX_BODY_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_body_size),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            queue_backend,
            embedded_workers: match queue_backend {
                QueueBackend::Memory => embedded_workers.max(1),
                QueueBackend::Redis => embedded_workers,
            },
            metrics_enabled: std::env::var("METRICS_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.metrics_enabled),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_backend_parse() {
        assert_eq!("redis".parse::<QueueBackend>().unwrap(), QueueBackend::Redis);
        assert_eq!(" Memory ".parse::<QueueBackend>().unwrap(), QueueBackend::Memory);
        assert!("kafka".parse::<QueueBackend>().is_err());
    }

    #[test]
    fn test_production_flag() {
        let mut config = ApiConfig::default();
        assert!(!config.is_production());
        config.environment = "Production".into();
        assert!(config.is_production());
    }
}
