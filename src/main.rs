//! Axon Worker - Signal Bus Daemon
//!
//! Builds a signal bus from configuration and runs its worker loop
//! (delivery, dead-letter retries, expiry sweeps) until SIGINT/SIGTERM.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `AXON_CONFIG`: Path to the TOML config (default: "config/axon.toml")
//! - `AXON_WORKER_NAME`: Unique worker identifier (default: hostname or UUID)
//! - `RUST_LOG`: Logging level (default: "info")

use std::env;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use axon::config::{AxonConfig, DEFAULT_LOG_HANDLER};
use axon::shutdown::ShutdownSignal;
use axon::{RouteOptions, SignalBus};

/// Load the config file, falling back to defaults if it is unusable.
fn load_config() -> AxonConfig {
    match AxonConfig::load() {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            AxonConfig::default()
        }
    }
}

/// Build the bus, adding a catch-all log route when none are configured.
fn build_bus(config: &AxonConfig) -> Result<Arc<SignalBus>, Box<dyn std::error::Error>> {
    let bus = config.build_bus()?;

    if config.routes.is_empty() {
        bus.router()
            .register("*", DEFAULT_LOG_HANDLER, RouteOptions::default())?;
        info!("No routes configured, logging every signal");
    }

    info!(
        patterns = ?bus.router().patterns(),
        handlers = ?bus.registry().list(),
        "Router configured"
    );
    Ok(bus)
}

/// Get the worker name from environment, config, or generate one.
fn get_worker_name(config: &AxonConfig) -> String {
    if let Ok(name) = env::var("AXON_WORKER_NAME") {
        return name;
    }

    if let Some(name) = &config.worker.name {
        return name.clone();
    }

    // Try hostname
    if let Ok(hostname) = hostname::get() {
        if let Some(name) = hostname.to_str() {
            return format!("worker-{}", name);
        }
    }

    // Fallback to UUID
    format!("worker-{}", uuid::Uuid::new_v4())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_config();
    let worker_name = get_worker_name(&config);

    info!(
        worker_name = %worker_name,
        strategy = %config.router.strategy,
        max_retries = config.dead_letter.max_retries,
        "Axon worker starting"
    );

    let bus = build_bus(&config).map_err(|e| {
        error!(error = %e, "Failed to build signal bus");
        e
    })?;

    // Setup graceful shutdown
    let shutdown = ShutdownSignal::new();
    let worker = tokio::spawn(Arc::clone(&bus).run(shutdown.clone()));

    shutdown.wait().await;

    if tokio::time::timeout(shutdown.timeout(), worker).await.is_err() {
        warn!(
            timeout_secs = shutdown.timeout().as_secs(),
            "Worker loop did not stop in time"
        );
    }

    match bus.stats().await {
        Ok(stats) => info!(
            delivered = stats.delivered,
            delivery_failures = stats.delivery_failures,
            dead_letters = stats.dead_letters.current,
            dropped = stats.scheduler.total_dropped(),
            "Worker statistics"
        ),
        Err(e) => warn!(error = %e, "Could not collect final statistics"),
    }

    info!("Worker shutdown complete");
    Ok(())
}
