//! procsightd - process profiling daemon
//!
//! Runs the profiling pipeline behind a small HTTP surface: sessions are
//! started and queried over JSON, health and Prometheus metrics are exposed
//! for probes and scraping.

use anyhow::Result;
use procsight_lib::{
    health::{components, HealthRegistry},
    observability::PipelineMetrics,
    session::SessionRegistry,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const DAEMON_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!(version = DAEMON_VERSION, "Starting procsightd");

    // Load configuration
    let config = config::DaemonConfig::load()?;
    info!(
        api_port = config.api_port,
        sample_interval_secs = config.sample_interval_secs,
        "Daemon configured"
    );

    // Initialize health registry
    let health_registry = HealthRegistry::new();
    health_registry.register(components::COLLECTOR).await;
    health_registry.register(components::SEGMENTER).await;
    health_registry.register(components::DEADLOCK).await;
    health_registry.register(components::CLASSIFIER).await;

    // Initialize metrics
    let metrics = PipelineMetrics::new();

    // Create shared application state
    let registry = SessionRegistry::new();
    let app_state = Arc::new(
        api::AppState::new(registry, health_registry.clone(), metrics)
            .with_model_path(config.model_path.clone().map(Into::into))
            .with_defaults(config.sample_interval_secs, config.session_duration_secs),
    );

    // Mark daemon as ready after initialization
    health_registry.set_ready(true).await;

    // Start the API server
    let state = app_state.clone();
    let api_handle = tokio::spawn(api::serve(config.api_port, state));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("SIGINT received, shutting down");
    app_state.registry.shutdown();
    api_handle.abort();

    Ok(())
}
