//! arVault Coordinator Binary
//!
//! Opens the durable store, replays pending exchanges and serves until Ctrl+C.

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use arvault_coordinator::{
    CoordinatorConfig, ExchangeCoordinator, Metrics, SimulatedGateway, StatsdSink, TelemetrySink,
};
use arvault_ledger::{seed_defaults, SqliteStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = CoordinatorConfig::from_env();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting arVault Coordinator");

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let store = Arc::new(SqliteStore::connect(&config.database_url).await?);
    if config.seed_defaults {
        let report = seed_defaults(store.as_ref(), store.as_ref()).await?;
        info!(accounts = report.accounts, rates = report.rates, "Seed check done");
    }

    // In-process registry when StatsD is not configured or unreachable
    let mut local = None;
    let telemetry: Arc<dyn TelemetrySink> = match &config.telemetry.statsd_host {
        Some(host) => match StatsdSink::connect(host, config.telemetry.statsd_port, &config.telemetry.prefix) {
            Ok(sink) => Arc::new(sink),
            Err(e) => {
                warn!(host = %host, error = %e, "StatsD unavailable, keeping metrics in-process");
                local.insert(Arc::new(Metrics::new())).clone()
            }
        },
        None => local.insert(Arc::new(Metrics::new())).clone(),
    };

    let gateway = Arc::new(SimulatedGateway::new(config.transfer.clone()));
    let coordinator = Arc::new(
        ExchangeCoordinator::new(
            config.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            gateway,
        )
        .with_telemetry(telemetry),
    );

    // Replay pending work before serving anything
    let report = coordinator
        .run_recovery()
        .await
        .map_err(|e| anyhow::anyhow!("Recovery failed: {}", e))?;

    info!(
        database_url = %config.database_url,
        recovery = %serde_json::to_string(&report)?,
        currencies = ?config.supported_currencies,
        "Coordinator running"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    coordinator.stop().await;
    store.close().await;

    if let Some(metrics) = local {
        info!(metrics = %serde_json::to_string(&metrics.snapshot())?, "Final metrics");
    }

    info!("Coordinator shutdown complete");
    Ok(())
}
