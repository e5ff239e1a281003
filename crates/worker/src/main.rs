mod cli;
mod http;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pixelq_core::{
    load_config, pipeline::prepare_workspace_root, validate_config, AzureQueue, Config,
    Dispatcher, JobQueue, LeasePolicy, PipelineConfig, PipelineController, ProcessStageExecutor,
    SanitizedConfig, SasStorageGateway, StageExecutor, StorageGateway,
};

use cli::Cli;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration before logging so the format can be chosen
    let mut config = load_config(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;
    if let Some(n) = cli.num_process {
        config.dispatcher.max_concurrent_jobs = n as usize;
    }

    init_logging(config.logging.json);

    validate_config(&config).context("Configuration validation failed")?;

    let worker_id = uuid::Uuid::new_v4().to_string();
    let config_hash = config_hash(&config);
    info!(
        version = VERSION,
        worker_id = %worker_id,
        config_hash = %config_hash,
        "Starting pixelq worker"
    );
    info!(
        "Configuration loaded from {:?}: {}",
        cli.config,
        serde_json::to_string(&SanitizedConfig::from(&config)).unwrap_or_default()
    );

    // Prepare working directory
    let removed = prepare_workspace_root(&config.workspace.root)
        .await
        .with_context(|| format!("Failed to prepare workspace root {:?}", config.workspace.root))?;
    if removed > 0 {
        warn!("Removed {} stale job directories from a previous run", removed);
    }

    // Create collaborators
    let queue: Arc<dyn JobQueue> = Arc::new(
        AzureQueue::new(config.queue.clone()).context("Failed to create queue client")?,
    );
    let storage: Arc<dyn StorageGateway> = Arc::new(
        SasStorageGateway::new(config.storage.clone())
            .context("Failed to create storage gateway")?,
    );
    let executor: Arc<dyn StageExecutor> = Arc::new(ProcessStageExecutor::new());
    info!("Queue: {}", config.queue.url);
    info!("Storage endpoint: {}", config.storage.endpoint);

    let controller = Arc::new(PipelineController::new(
        storage,
        executor,
        PipelineConfig::from(&config),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        config.dispatcher.clone(),
        LeasePolicy::from(&config.queue),
        queue,
        controller,
    ));

    // Start metrics server if enabled
    let server = if config.metrics.enabled {
        let app = http::create_router(Arc::clone(&dispatcher), worker_id.clone());
        let listener = tokio::net::TcpListener::bind(config.metrics.listen)
            .await
            .with_context(|| format!("Failed to bind to {}", config.metrics.listen))?;
        info!("Serving health and metrics on {}", config.metrics.listen);

        Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        info!("Metrics endpoint disabled in config");
        None
    };

    dispatcher.run_until(shutdown_signal()).await;

    if let Some(server) = server {
        server.abort();
    }
    info!("Worker shut down");

    Ok(())
}

/// Short fingerprint of the effective configuration, secrets excluded.
fn config_hash(config: &Config) -> String {
    let json = serde_json::to_string(&SanitizedConfig::from(config)).unwrap_or_default();
    let hash = format!("{:x}", Sha256::digest(json.as_bytes()));
    hash[..16].to_string()
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received, draining in-flight jobs");
}
