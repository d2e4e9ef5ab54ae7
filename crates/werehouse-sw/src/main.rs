//! Werehouse SW - offline cache proxy for the Werehouse frontend

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;
mod server;

use config::{Config, LoggingConfig, StorageBackendKind};
use server::{AppState, create_router};
use werehouse_core::{CacheStoreManager, Strategy, UnmatchedPolicy, WorkerHost};
use werehouse_proxy::{OriginClient, OriginClientConfig};
use werehouse_storage::{CacheStorage, LocalStorage, MemoryStorage};

/// Werehouse SW - cache strategy proxy in front of a Werehouse origin
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// Bind address
    #[arg(long, env = "WEREHOUSE_SW_BIND")]
    bind: Option<String>,

    /// Port
    #[arg(short, long, env = "WEREHOUSE_SW_PORT")]
    port: Option<u16>,

    /// Origin URL
    #[arg(long, env = "WEREHOUSE_SW_ORIGIN")]
    origin: Option<String>,

    /// Strategy for precached paths: cache-first, cache-first-with-refresh or network-first
    #[arg(long, env = "WEREHOUSE_SW_PRECACHE_STRATEGY")]
    precache_strategy: Option<Strategy>,

    /// Handling of paths no rule claims: network-first or passthrough
    #[arg(long, env = "WEREHOUSE_SW_UNMATCHED")]
    unmatched: Option<UnmatchedPolicy>,

    /// Write the effective configuration to the config path and exit
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)?;
    apply_overrides(&mut config, &args);

    if args.init_config {
        config.save(&args.config)?;
        return Ok(());
    }

    init_logging(&config.logging);

    info!("Starting Werehouse SW v{}", env!("CARGO_PKG_VERSION"));

    let worker_config = config.worker_config()?;
    let origin_url = worker_config.origin.clone();

    // Initialize storage backend
    let storage: Arc<dyn CacheStorage> = match config.storage.backend {
        StorageBackendKind::Memory => {
            info!("Using in-memory cache storage");
            Arc::new(MemoryStorage::new())
        }
        StorageBackendKind::Local => {
            tokio::fs::create_dir_all(&config.storage.local.path)
                .await
                .with_context(|| {
                    format!("Failed to create {}", config.storage.local.path)
                })?;
            Arc::new(LocalStorage::new(&config.storage.local.path).await?)
        }
    };

    // Initialize origin client
    let origin = Arc::new(OriginClient::new(OriginClientConfig {
        url: origin_url.clone(),
        skip_tls_verify: config.origin.skip_tls_verify,
        user_agent: config.origin.user_agent.clone(),
    })?);

    match origin.ping().await {
        Ok(true) => info!("Origin {} is reachable", origin_url),
        Ok(false) => warn!("Origin {} answered with a server error", origin_url),
        Err(e) => warn!("Origin {} is unreachable: {}", origin_url, e),
    }

    // Install and activate the worker
    let manager = Arc::new(CacheStoreManager::new(
        worker_config,
        storage,
        origin.clone(),
    ));
    let host = Arc::new(WorkerHost::for_manager(manager));
    if let Err(e) = host.start().await {
        warn!(
            "Worker is {} ({}); requests will go straight to the origin",
            host.state(),
            e
        );
    }

    let metrics = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Failed to install metrics recorder: {}", e);
            None
        }
    };

    let state = AppState::new(host.clone(), origin, origin_url.clone(), metrics);
    let app = create_router(state).layer(TraceLayer::new_for_http());

    // Determine bind address
    let bind_addr = args.bind.unwrap_or(config.server.bind_address);
    let port = args.port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{}:{}", bind_addr, port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", bind_addr, port))?;

    info!("Listening on {}", addr);
    info!("Origin: {}", origin_url);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    host.shutdown().await;
    info!("Server stopped");
    Ok(())
}

/// Apply command line overrides on top of the loaded configuration
fn apply_overrides(config: &mut Config, args: &Args) {
    if let Some(ref origin) = args.origin {
        config.origin.url = origin.clone();
    }
    if let Some(strategy) = args.precache_strategy {
        config.cache.precache_strategy = strategy;
    }
    if let Some(unmatched) = args.unmatched {
        config.cache.unmatched = unmatched;
    }
}

/// Initialize logging
///
/// `RUST_LOG` takes precedence over the configured level.
fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for CTRL+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
