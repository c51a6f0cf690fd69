//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// How often the worker scans for deliveries abandoned by dead consumers
    pub claim_interval: Duration,
    /// Minimum idle time before a pending delivery can be taken over
    pub claim_min_idle: Duration,
    /// How long a dequeue call blocks waiting for new work
    pub poll_block: Duration,
    /// Build every archive variant right after a job finishes
    pub package_on_finish: bool,
    /// Fallback overlay assets for UGC jobs (`add1.png`, `add2.mov`, `ClipEnd.mov`)
    pub assets_dir: PathBuf,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            shutdown_timeout: Duration::from_secs(30),
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(300), // 5 minutes
            poll_block: Duration::from_secs(1),
            package_on_finish: false,
            assets_dir: PathBuf::from("assets"),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_jobs: std::env::var("WORKER_MAX_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_concurrent_jobs),
            shutdown_timeout: Duration::from_secs(
                std::env::var("WORKER_SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            claim_interval: Duration::from_secs(
                std::env::var("WORKER_CLAIM_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .filter(|n: &u64| *n > 0)
                    .unwrap_or(30),
            ),
            claim_min_idle: Duration::from_secs(
                std::env::var("WORKER_CLAIM_MIN_IDLE_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
            poll_block: defaults.poll_block,
            package_on_finish: std::env::var("WORKER_PACKAGE_ON_FINISH")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            assets_dir: std::env::var("RECLIP_ASSETS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.assets_dir),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.max_concurrent_jobs, 2);
        assert_eq!(config.claim_min_idle, Duration::from_secs(300));
        assert!(!config.package_on_finish);
    }
}
