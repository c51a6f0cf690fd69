//! Application state.

use std::sync::Arc;

use crate::config::ApiConfig;
use crate::service::JobService;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub service: Arc<JobService>,
}

impl AppState {
    pub fn new(config: ApiConfig, service: JobService) -> Self {
        Self {
            config,
            service: Arc::new(service),
        }
    }
}
