//! Service loop: periodic ticks until shutdown.

use std::future::Future;
use std::path::Path;

use ratewatch_fx::InstitutionDescriptor;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::aggregator::Aggregator;

/// Run ticks on the configured interval until `shutdown` resolves.
///
/// Missed triggers are skipped rather than bunched up. Shutdown is honoured
/// while a tick is in flight: the tick is dropped at its next await point,
/// and every snapshot write it completed before that stays persisted.
pub async fn serve<F>(aggregator: &Aggregator, institutions: &[InstitutionDescriptor], shutdown: F)
where
    F: Future<Output = ()>,
{
    let mut interval = tokio::time::interval(aggregator.config().scheduler.tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
            _ = interval.tick() => {
                tokio::select! {
                    result = aggregator.run_tick(institutions) => {
                        if result.is_err() {
                            debug!("Tick will be retried from scratch on the next trigger");
                        }
                        export_metrics(aggregator).await;
                    }
                    _ = &mut shutdown => {
                        warn!("Shutdown signal received during a tick, abandoning it");
                        break;
                    }
                }
            }
        }
    }
}

/// Write the counters to the configured metrics file, if any.
///
/// Failures are logged and otherwise ignored.
pub async fn export_metrics(aggregator: &Aggregator) {
    let Some(path) = &aggregator.config().metrics_path else {
        return;
    };

    if let Err(e) = write_atomically(path, &aggregator.metrics().to_prometheus()).await {
        warn!(path = %path.display(), error = %e, "Failed to write metrics file");
    }
}

// Collectors may read at any time, so never expose a half-written file.
async fn write_atomically(path: &Path, contents: &str) -> std::io::Result<()> {
    let staging = path.with_extension("prom.tmp");
    tokio::fs::write(&staging, contents).await?;
    tokio::fs::rename(&staging, path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use ratewatch_common::{InstitutionProfile, InstitutionSlug, ManualClock};
    use ratewatch_fx::{FxResult, QuoteMap, SourceAdapter};
    use ratewatch_store::InMemorySnapshotStore;
    use tokio::sync::{oneshot, Notify};
    use uuid::Uuid;

    use crate::config::AggregatorConfig;

    /// Never answers; signals when it has been asked.
    struct StuckAdapter {
        entered: Arc<Notify>,
    }

    #[async_trait]
    impl SourceAdapter for StuckAdapter {
        fn name(&self) -> &str {
            "stuck"
        }

        async fn refresh(&self, _institution: &InstitutionSlug) -> FxResult<Option<QuoteMap>> {
            self.entered.notify_one();
            std::future::pending().await
        }
    }

    fn aggregator(config: AggregatorConfig) -> Aggregator {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap(),
        ));
        Aggregator::new(config, Arc::new(InMemorySnapshotStore::new()), clock).unwrap()
    }

    fn scratch_file() -> PathBuf {
        std::env::temp_dir().join(format!("ratewatch-metrics-{}.prom", Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_tick_in_flight() {
        let aggregator = aggregator(AggregatorConfig::default());
        let entered = Arc::new(Notify::new());
        let institutions = vec![InstitutionDescriptor::new(
            InstitutionProfile::new("cbe", "CBE", "cbe", "CBE"),
            Arc::new(StuckAdapter {
                entered: entered.clone(),
            }),
        )];
        let (stop, stopped) = oneshot::channel::<()>();

        let signal = async move {
            entered.notified().await;
            stop.send(()).ok();
        };
        let service = serve(&aggregator, &institutions, async {
            stopped.await.ok();
        });

        let (finished, _) = tokio::join!(
            tokio::time::timeout(Duration::from_secs(5), service),
            signal
        );

        assert!(finished.is_ok());
        assert_eq!(aggregator.metrics().snapshot().ticks_started, 1);
        assert_eq!(aggregator.metrics().snapshot().ticks_total, 0);
    }

    #[tokio::test]
    async fn test_metrics_file_written_after_tick() {
        let path = scratch_file();
        let config = AggregatorConfig {
            metrics_path: Some(path.clone()),
            ..AggregatorConfig::default()
        };
        let aggregator = aggregator(config);
        let (stop, stopped) = oneshot::channel::<()>();

        let service = serve(&aggregator, &[], async {
            stopped.await.ok();
        });
        let signal = async {
            // The first trigger fires immediately; wait for its export.
            while !path.exists() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            stop.send(()).ok();
        };
        let (finished, _) = tokio::join!(
            tokio::time::timeout(Duration::from_secs(5), service),
            signal
        );

        assert!(finished.is_ok());
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("ratewatch_ticks_total 1"));
        std::fs::remove_file(path).ok();
    }

    #[tokio::test]
    async fn test_no_metrics_file_configured() {
        let aggregator = aggregator(AggregatorConfig::default());
        export_metrics(&aggregator).await;
        assert!(aggregator.config().metrics_path.is_none());
    }
}
