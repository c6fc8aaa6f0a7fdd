//! RateWatch Simulator
//!
//! Drives the aggregation engine against simulated banks on a simulated
//! clock, either for a number of noisy ticks or through a scripted scenario.

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod bank;
mod scenario;
mod controller;
mod metrics;

use bank::MarketNoise;
use controller::SimulationController;
use scenario::Scenario;

/// RateWatch Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "RateWatch test and simulation environment")]
struct Args {
    /// Number of simulated institutions, taken from the built-in catalogue
    #[arg(short, long, default_value = "5")]
    institutions: usize,

    /// Number of ticks to run when no scenario is given
    #[arg(short, long, default_value = "12")]
    ticks: u64,

    /// Simulated minutes between ticks
    #[arg(long, default_value = "20")]
    minutes_per_tick: i64,

    /// Probability that a refresh carries a wild rate
    #[arg(long, default_value = "0.05")]
    outlier_rate: f64,

    /// Probability that a refresh fails outright
    #[arg(long, default_value = "0.05")]
    failure_rate: f64,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Scenario to run: a built-in name or a JSON file
    #[arg(short, long)]
    scenario: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    for (name, rate) in [("outlier-rate", args.outlier_rate), ("failure-rate", args.failure_rate)] {
        if !(0.0..=1.0).contains(&rate) {
            anyhow::bail!("--{} must be within [0, 1], got {}", name, rate);
        }
    }

    info!("Starting RateWatch Simulator");
    info!("Institutions: {}", args.institutions);

    let noise = MarketNoise {
        outlier_rate: args.outlier_rate,
        failure_rate: args.failure_rate,
    };
    let mut controller =
        SimulationController::new(args.institutions, args.minutes_per_tick, noise, args.seed)?;

    if let Some(scenario_name) = &args.scenario {
        let scenario = Scenario::load(scenario_name)?;
        controller.run_scenario(scenario).await?;
    } else {
        controller.run(args.ticks).await?;
    }

    // Print metrics
    let metrics = controller.get_metrics();
    info!("Simulation complete");
    info!("Ticks: {} completed, {} aborted", metrics.ticks_completed, metrics.ticks_aborted);
    info!(
        "Refreshes: {} reconciled, {} unchanged, {} failed",
        metrics.reconciled, metrics.unchanged, metrics.failed
    );
    info!("Outlier fields rejected: {}", metrics.rejected_fields);
    for (currency, baseline) in &metrics.baselines {
        info!(
            "Baseline {}: buying {}, selling {}",
            currency, baseline.buying, baseline.selling
        );
    }
    info!("Success rate: {:.1}%", metrics.success_rate() * 100.0);
    if metrics.assertions_passed + metrics.assertions_failed > 0 {
        info!(
            "Assertions: {} passed, {} failed",
            metrics.assertions_passed, metrics.assertions_failed
        );
    }
    info!(
        "Engine counters: {}",
        serde_json::to_string(&controller.aggregator().metrics().snapshot())?
    );

    Ok(())
}
