//! arVault Simulator
//!
//! Drives random exchanges through a coordinator against a simulated client
//! bank, injects transfer failures and restarts, then checks that no funds were
//! created or lost.

use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod bank;
mod controller;
mod metrics;
mod scenario;

use controller::{SimulationController, SimulationSettings};
use scenario::Scenario;

/// arVault Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "arVault load and fault simulation environment")]
struct Args {
    /// Built-in scenario name or path to a JSON scenario file
    #[arg(short, long, default_value = "random-load")]
    scenario: String,

    /// Override the number of exchanges per random batch
    #[arg(short, long)]
    exchanges: Option<usize>,

    /// Exchanges in flight at once
    #[arg(short, long, default_value = "16")]
    concurrency: usize,

    /// Override the scenario's transfer failure rate
    #[arg(long)]
    failure_rate: Option<f64>,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// SQLite database URL (in memory when omitted)
    #[arg(long)]
    database_url: Option<String>,

    /// Minimum client transfer latency
    #[arg(long, default_value = "20")]
    min_latency_ms: u64,

    /// Maximum client transfer latency
    #[arg(long, default_value = "80")]
    max_latency_ms: u64,

    /// Print coordinator telemetry in Prometheus text format
    #[arg(long)]
    print_telemetry: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut scenario = Scenario::load(&args.scenario)?;
    if let Some(exchanges) = args.exchanges {
        scenario = scenario.with_exchanges(exchanges);
    }
    let failure_rate = args.failure_rate.unwrap_or(scenario.failure_rate);
    if !(0.0..=1.0).contains(&failure_rate) {
        anyhow::bail!("failure rate must be within [0, 1], got {failure_rate}");
    }

    info!("Starting arVault Simulator");
    info!("Scenario: {}", scenario.name);
    info!("Failure rate: {}", failure_rate);

    let settings = SimulationSettings {
        seed: args.seed,
        concurrency: args.concurrency,
        latency: (
            Duration::from_millis(args.min_latency_ms),
            Duration::from_millis(args.max_latency_ms.max(args.min_latency_ms)),
        ),
        database_url: args.database_url,
        ..SimulationSettings::default()
    };
    let controller = SimulationController::new(settings, failure_rate).await?;

    let outcome = controller.run_scenario(&scenario).await;

    let metrics = controller.get_metrics().await;
    let (transfers, injected, refunds) = controller.bank().stats();
    info!("Simulation complete");
    info!("Total exchanges: {}", metrics.total_exchanges);
    info!("Successful: {}", metrics.successful_exchanges);
    info!("Rejected: {}", metrics.rejected_exchanges);
    info!("Failed: {}", metrics.failed_exchanges);
    info!("Success rate: {:.1}%", metrics.success_rate() * 100.0);
    info!("Average latency: {}ms", metrics.average_latency_ms());
    info!("P99 latency: {}ms", metrics.p99_latency_ms());
    info!("Transfers: {} ({} injected failures, {} refunds)", transfers, injected, refunds);
    for (outcome, count) in &metrics.outcomes {
        info!("  {}: {}", outcome, count);
    }
    if args.print_telemetry {
        println!("{}", controller.telemetry().to_prometheus());
    }

    controller.shutdown().await;
    outcome
}
