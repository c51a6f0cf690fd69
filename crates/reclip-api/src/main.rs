//! Axum API server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use reclip_api::{create_router, metrics, ApiConfig, AppState, JobService, QueueBackend};
use reclip_media::{FfmpegRenderer, RendererConfig};
use reclip_queue::{JobQueue, MemoryQueue, RedisQueue};
use reclip_storage::{FsJobStore, JobLayout, JobStore, StorageConfig, UploadStore};
use reclip_worker::{JobExecutor, Stager, WorkerConfig, WorkerContext};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Install rustls crypto provider (required for rustls 0.23+)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

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

    info!("Starting reclip-api");

    let config = ApiConfig::from_env();
    info!(
        "API config: host={}, port={}, queue={:?}, embedded_workers={}",
        config.host, config.port, config.queue_backend, config.embedded_workers
    );

    let storage = StorageConfig::from_env();
    if let Err(e) = storage.ensure_dirs().await {
        error!("Failed to create data directories: {}", e);
        std::process::exit(1);
    }
    let layout = JobLayout::new(storage.jobs_dir());
    let uploads = UploadStore::new(storage.uploads_dir());
    let store: Arc<dyn JobStore> = Arc::new(FsJobStore::new(layout.clone()));

    let queue: Arc<dyn JobQueue> = match config.queue_backend {
        QueueBackend::Redis => {
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
            Arc::new(queue)
        }
        QueueBackend::Memory => {
            warn!("Using in-process queue; jobs are lost on restart");
            Arc::new(MemoryQueue::new())
        }
    };

    let service = JobService::new(Arc::clone(&store), Arc::clone(&queue), uploads.clone(), layout.clone());

    // Embedded workers share the service's packager so archive builds are
    // serialized across HTTP and worker paths
    let mut executors = Vec::new();
    if config.embedded_workers > 0 {
        let renderer = match FfmpegRenderer::new(RendererConfig::from_env()) {
            Ok(r) => Arc::new(r),
            Err(e) => {
                error!("Failed to create renderer: {}", e);
                std::process::exit(1);
            }
        };
        for _ in 0..config.embedded_workers {
            let worker_config = WorkerConfig::from_env();
            let ctx = WorkerContext {
                store: Arc::clone(&store),
                queue: Arc::clone(&queue),
                renderer: renderer.clone(),
                stager: Stager::new(uploads.clone(), layout.clone(), worker_config.assets_dir.clone()),
                layout: layout.clone(),
                packager: service.packager(),
            };
            let executor = Arc::new(JobExecutor::new(worker_config, ctx));
            let runner = Arc::clone(&executor);
            tokio::spawn(async move {
                if let Err(e) = runner.run().await {
                    error!(consumer = %runner.consumer_name(), "Embedded worker stopped: {}", e);
                }
            });
            executors.push(executor);
        }
        info!("Started {} embedded worker(s)", executors.len());
    }

    let metrics_handle = if config.metrics_enabled {
        match metrics::init_metrics() {
            Ok(handle) => {
                info!("Prometheus metrics enabled at /metrics");
                Some(handle)
            }
            Err(e) => {
                warn!("Failed to install metrics recorder: {}", e);
                None
            }
        }
    } else {
        None
    };

    let app = create_router(AppState::new(config.clone(), service), metrics_handle);

    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Invalid bind address {}:{}: {}", config.host, config.port, e);
            std::process::exit(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    info!("Listening on {}", addr);

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(executors))
    .await;

    if let Err(e) = served {
        error!("Server error: {}", e);
        std::process::exit(1);
    }

    info!("Server shutdown complete");
}

async fn shutdown_signal(executors: Vec<Arc<JobExecutor>>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Received shutdown signal");
    for executor in &executors {
        executor.shutdown();
    }
}
