//! RateWatch Aggregator Binary
//!
//! Runs reconciliation ticks on a fixed interval against the feed directory
//! and persists the snapshot to PostgreSQL, or to memory when no database
//! is configured.

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ratewatch_aggregator::{
    catalogue, export_metrics, serve, Aggregator, AggregatorConfig, FeedDirectoryAdapter,
};
use ratewatch_common::SystemClock;
use ratewatch_store::{InMemorySnapshotStore, PgSnapshotStore, SnapshotStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = AggregatorConfig::from_env();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting RateWatch aggregator");

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let store: Arc<dyn SnapshotStore> = match &config.store.database_url {
        Some(url) => {
            let store = PgSnapshotStore::connect(url, &config.store.document_id).await?;
            store.migrate().await?;
            info!(document_id = %config.store.document_id, "Using PostgreSQL snapshot store");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set, snapshot will not survive a restart");
            Arc::new(InMemorySnapshotStore::new())
        }
    };

    let profiles = match &config.catalogue_path {
        Some(path) => catalogue::load_catalogue(path).await?,
        None => catalogue::default_catalogue(),
    };
    let adapter = Arc::new(FeedDirectoryAdapter::new(config.feed_dir.clone()));
    let institutions = catalogue::descriptors(profiles, adapter);

    info!(
        institutions = institutions.len(),
        feed_dir = %config.feed_dir.display(),
        staleness_secs = config.scheduler.staleness_threshold.as_secs(),
        tick_interval_secs = config.scheduler.tick_interval.as_secs(),
        "Aggregator configured"
    );

    let run_once = config.run_once;
    let aggregator = Aggregator::new(config, store, Arc::new(SystemClock))?;

    if run_once {
        let report = aggregator.run_tick(&institutions).await;
        export_metrics(&aggregator).await;
        let report = report?;
        info!(
            tick_id = %report.tick_id,
            persisted = report.persisted(),
            failed = report.failed(),
            "Single tick complete"
        );
        return Ok(());
    }

    serve(&aggregator, &institutions, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    })
    .await;

    info!(metrics = ?aggregator.metrics().snapshot(), "Aggregator shutdown complete");
    Ok(())
}
