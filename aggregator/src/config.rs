//! Aggregator configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use ratewatch_common::{constants, SNAPSHOT_DOCUMENT_ID};
use rust_decimal::Decimal;

/// Scheduling configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Age after which an institution is refreshed again.
    pub staleness_threshold: Duration,
    /// Interval between ticks in the service loop.
    pub tick_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            staleness_threshold: constants::STALENESS_THRESHOLD,
            tick_interval: constants::TICK_INTERVAL,
        }
    }
}

impl SchedulerConfig {
    /// Staleness threshold as a signed duration for timestamp arithmetic.
    ///
    /// `None` if the threshold is too large to compare timestamps with.
    pub fn threshold(&self) -> Option<chrono::Duration> {
        chrono::Duration::from_std(self.staleness_threshold).ok()
    }
}

/// Outlier filter configuration.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Relative band around the baseline, e.g. `0.2` for ±20%.
    pub outlier_band: Decimal,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            outlier_band: Decimal::new(2, 1),
        }
    }
}

/// Snapshot store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// PostgreSQL URL. The in-memory store is used when absent.
    pub database_url: Option<String>,
    /// Identifier of the snapshot document.
    pub document_id: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            document_id: SNAPSHOT_DOCUMENT_ID.to_string(),
        }
    }
}

/// Main aggregator configuration.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Scheduling configuration.
    pub scheduler: SchedulerConfig,
    /// Outlier filter configuration.
    pub filter: FilterConfig,
    /// Snapshot store configuration.
    pub store: StoreConfig,
    /// Directory the feed adapters read `<slug>.json` files from.
    pub feed_dir: PathBuf,
    /// Institution catalogue file. The built-in catalogue is used when absent.
    pub catalogue_path: Option<PathBuf>,
    /// File the counters are written to in Prometheus text format after
    /// every tick, for a textfile collector.
    pub metrics_path: Option<PathBuf>,
    /// Run a single tick and exit.
    pub run_once: bool,
    /// Log level.
    pub log_level: String,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            filter: FilterConfig::default(),
            store: StoreConfig::default(),
            feed_dir: PathBuf::from("/var/lib/ratewatch/feeds"),
            catalogue_path: None,
            metrics_path: None,
            run_once: false,
            log_level: "info".to_string(),
        }
    }
}

impl AggregatorConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(secs) = std::env::var("RATEWATCH_STALENESS_SECS") {
            if let Ok(secs) = secs.parse() {
                config.scheduler.staleness_threshold = Duration::from_secs(secs);
            }
        }

        if let Ok(secs) = std::env::var("RATEWATCH_TICK_INTERVAL_SECS") {
            if let Ok(secs) = secs.parse() {
                config.scheduler.tick_interval = Duration::from_secs(secs);
            }
        }

        if let Ok(band) = std::env::var("RATEWATCH_OUTLIER_BAND") {
            if let Ok(band) = Decimal::from_str(band.trim()) {
                config.filter.outlier_band = band;
            }
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.is_empty() {
                config.store.database_url = Some(url);
            }
        }

        if let Ok(id) = std::env::var("RATEWATCH_DOCUMENT_ID") {
            config.store.document_id = id;
        }

        if let Ok(dir) = std::env::var("RATEWATCH_FEED_DIR") {
            config.feed_dir = PathBuf::from(dir);
        }

        if let Ok(path) = std::env::var("RATEWATCH_CATALOGUE") {
            config.catalogue_path = Some(PathBuf::from(path));
        }

        if let Ok(path) = std::env::var("RATEWATCH_METRICS_FILE") {
            config.metrics_path = Some(PathBuf::from(path));
        }

        if let Ok(flag) = std::env::var("RATEWATCH_RUN_ONCE") {
            config.run_once = matches!(flag.trim(), "1" | "true" | "yes");
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.scheduler.staleness_threshold.is_zero() {
            return Err("Staleness threshold cannot be zero".to_string());
        }

        if self.scheduler.threshold().is_none() {
            return Err(format!(
                "Staleness threshold of {}s is out of range",
                self.scheduler.staleness_threshold.as_secs()
            ));
        }

        if self.scheduler.tick_interval.is_zero() {
            return Err("Tick interval cannot be zero".to_string());
        }

        if self.filter.outlier_band <= Decimal::ZERO || self.filter.outlier_band >= Decimal::ONE {
            return Err(format!(
                "Outlier band must be within (0, 1), got {}",
                self.filter.outlier_band
            ));
        }

        if self.store.document_id.is_empty() {
            return Err("Document ID cannot be empty".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config() {
        let config = AggregatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.threshold(), Some(chrono::Duration::minutes(10)));
        assert_eq!(config.store.document_id, "current_bank_rates");
    }

    #[test]
    fn test_invalid_band() {
        let mut config = AggregatorConfig::default();
        config.filter.outlier_band = dec!(1.5);
        assert!(config.validate().is_err());

        config.filter.outlier_band = Decimal::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_durations() {
        let mut config = AggregatorConfig::default();
        config.scheduler.staleness_threshold = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = AggregatorConfig::default();
        config.scheduler.tick_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_oversized_threshold_rejected() {
        let mut config = AggregatorConfig::default();
        config.scheduler.staleness_threshold = Duration::from_secs(u64::MAX);

        assert_eq!(config.scheduler.threshold(), None);
        assert!(config.validate().unwrap_err().contains("out of range"));
    }

    #[test]
    fn test_empty_document_id() {
        let mut config = AggregatorConfig::default();
        config.store.document_id.clear();
        assert!(config.validate().is_err());
    }
}
