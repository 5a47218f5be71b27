//! Uptrail - uptime monitoring service
//!
//! Periodically checks ping, HTTP and TCP targets, records status changes
//! into daily JSON history files and serves the results over a JSON API.

mod config;
mod history;
mod probe;
mod scheduler;
mod web;

use config::ServerConfig;
use history::Store;
use probe::NetworkChecker;
use scheduler::Scheduler;
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("uptrail=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting Uptrail on port {}...", cfg.http_port);
    tracing::info!(
        "Probes from {}, history in {} (kept {} days)",
        cfg.config_file.display(),
        cfg.history_dir.display(),
        cfg.retention_days
    );

    let store = Arc::new(Store::new(&cfg.history_dir, cfg.retention_days)?);
    let expired = store.prune(cfg.retention_days);
    if expired > 0 {
        tracing::info!("Removed {} expired history files", expired);
    }

    let probes = match config::load_probes(&cfg.config_file, cfg.max_probes) {
        Ok(probes) => probes,
        Err(e) => {
            tracing::error!("Failed to load probes, starting with none: {}", e);
            Vec::new()
        }
    };

    // Start monitoring
    let scheduler = Arc::new(Scheduler::new(cfg.clone(), probes, store, Arc::new(NetworkChecker)));
    scheduler.start().await;

    // Serve until Ctrl-C
    let server = Server::new(cfg, scheduler.clone());
    let result = server.start(shutdown_signal()).await;

    scheduler.shutdown().await;
    result
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
