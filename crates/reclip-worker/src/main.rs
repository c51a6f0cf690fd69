//! Job worker binary.

use std::net::SocketAddr;
use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use reclip_media::{FfmpegRenderer, RendererConfig};
use reclip_queue::RedisQueue;
use reclip_storage::{FsJobStore, JobLayout, JobStore, Packager, StorageConfig, UploadStore};
use reclip_worker::{JobExecutor, Stager, WorkerConfig, WorkerContext};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("reclip=info".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting reclip-worker");

    if let Some(port) = std::env::var("WORKER_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        match PrometheusBuilder::new().with_http_listener(addr).install() {
            Ok(()) => info!("Serving Prometheus metrics on {}", addr),
            Err(e) => warn!("Failed to start metrics exporter: {}", e),
        }
    }

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    let storage = StorageConfig::from_env();
    if let Err(e) = storage.ensure_dirs().await {
        error!("Failed to create data directories: {}", e);
        std::process::exit(1);
    }
    let layout = JobLayout::new(storage.jobs_dir());
    let store: Arc<dyn JobStore> = Arc::new(FsJobStore::new(layout.clone()));

    let queue = match RedisQueue::from_env() {
        Ok(q) => q,
        Err(e) => {
            error!("Failed to create job queue: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = queue.init().await {
        error!("Failed to initialize job queue: {}", e);
        std::process::exit(1);
    }

    let renderer = match FfmpegRenderer::new(RendererConfig::from_env()) {
        Ok(r) => r,
        Err(e) => {
            error!("Failed to create renderer: {}", e);
            std::process::exit(1);
        }
    };

    let ctx = WorkerContext {
        store: Arc::clone(&store),
        queue: Arc::new(queue),
        renderer: Arc::new(renderer),
        stager: Stager::new(
            UploadStore::new(storage.uploads_dir()),
            layout.clone(),
            config.assets_dir.clone(),
        ),
        layout: layout.clone(),
        packager: Arc::new(Packager::new(layout, store)),
    };
    let executor = Arc::new(JobExecutor::new(config, ctx));

    // Setup signal handler
    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        signal_executor.shutdown();
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}
