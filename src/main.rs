//! # API Cache - Main Entry Point
//!
//! Starts the content API with rule-driven response caching.
//!
//! Start-up sequence:
//! 1. Load `config/cache.yaml` (or `CACHE_CONFIG_PATH`), apply environment
//!    overrides and validate
//! 2. Initialise logging and the Prometheus recorder
//! 3. Connect the cache store; an unreachable Redis leaves caching off
//! 4. Load the cache rules and register the invalidation hooks
//! 5. Serve until SIGINT or SIGTERM

use tokio::signal;
use tracing::{error, info, warn};

use api_cache::core::config::AppConfig;
use api_cache::observability::{init_logging, install_recorder};
use api_cache::{CacheServer, ServiceResult};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        // Logging may not be initialised yet
        eprintln!("api-cache failed: {}", e);
        error!("api-cache failed: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> ServiceResult<()> {
    let config_path = std::env::var("CACHE_CONFIG_PATH").unwrap_or_else(|_| "config/cache.yaml".to_string());
    let config = AppConfig::load_from_file(&config_path).await?;

    init_logging(&config.logging)?;
    info!("🚀 Starting API cache");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("📋 Configuration loaded from {}", config_path);

    let metrics = match install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Metrics disabled: {}", e);
            None
        }
    };

    let server = CacheServer::from_config(config).await?;
    if server.store().is_available() {
        info!("✅ Cache store available");
    } else {
        warn!("⚠️  Cache store unavailable, requests will bypass the cache");
    }

    server.serve(metrics, shutdown_signal()).await?;

    info!("✅ API cache shutdown complete");
    Ok(())
}

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
        _ = ctrl_c => info!("📡 Received SIGINT (Ctrl+C), initiating graceful shutdown..."),
        _ = terminate => info!("📡 Received SIGTERM, initiating graceful shutdown..."),
    }
}
