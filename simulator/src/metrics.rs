//! Simulation metrics.

use std::collections::BTreeMap;

use ratewatch_aggregator::{RefreshOutcome, TickReport};
use ratewatch_common::CurrencyCode;
use ratewatch_fx::Baseline;

/// Simulation metrics.
#[derive(Debug, Clone, Default)]
pub struct SimulationMetrics {
    /// Ticks that ran to completion.
    pub ticks_completed: u64,
    /// Ticks aborted by a store failure.
    pub ticks_aborted: u64,
    /// Refreshes persisted with changed values.
    pub reconciled: u64,
    /// Refreshes persisted with identical values.
    pub unchanged: u64,
    /// Refreshes that persisted nothing.
    pub failed: u64,
    /// Outlier fields screened out.
    pub rejected_fields: u64,
    /// Per-currency baselines after the latest completed tick.
    pub baselines: BTreeMap<CurrencyCode, Baseline>,
    /// Scenario assertions that held.
    pub assertions_passed: u64,
    /// Scenario assertions that did not hold.
    pub assertions_failed: u64,
}

impl SimulationMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed tick.
    pub fn record_tick(&mut self, report: &TickReport) {
        self.ticks_completed += 1;
        self.baselines = report.baselines.clone();

        for entry in &report.outcomes {
            match &entry.outcome {
                RefreshOutcome::Reconciled(summary) => {
                    self.reconciled += 1;
                    self.rejected_fields += summary.rejected.len() as u64;
                }
                RefreshOutcome::Unchanged(summary) => {
                    self.unchanged += 1;
                    self.rejected_fields += summary.rejected.len() as u64;
                }
                RefreshOutcome::Failed(_) => self.failed += 1,
            }
        }
    }

    /// Record an aborted tick.
    pub fn record_abort(&mut self) {
        self.ticks_aborted += 1;
    }

    /// Record an assertion result.
    pub fn record_assertion(&mut self, passed: bool) {
        if passed {
            self.assertions_passed += 1;
        } else {
            self.assertions_failed += 1;
        }
    }

    /// Share of refreshes that were persisted.
    pub fn success_rate(&self) -> f64 {
        let total = self.reconciled + self.unchanged + self.failed;
        if total == 0 {
            return 0.0;
        }

        (self.reconciled + self.unchanged) as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ratewatch_common::TickId;
    use rust_decimal::Decimal;

    fn report(baselines: BTreeMap<CurrencyCode, Baseline>) -> TickReport {
        let at = Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap();
        TickReport {
            tick_id: TickId::new(),
            started_at: at,
            finished_at: at,
            due: Vec::new(),
            outcomes: Vec::new(),
            baselines,
            skipped: false,
        }
    }

    #[test]
    fn test_latest_tick_baselines_kept() {
        let mut metrics = SimulationMetrics::new();
        let mut first = BTreeMap::new();
        first.insert(CurrencyCode::usd(), Baseline::new(Decimal::new(130, 0), Decimal::new(133, 0)));
        let mut second = BTreeMap::new();
        second.insert(CurrencyCode::usd(), Baseline::new(Decimal::new(131, 0), Decimal::new(134, 0)));

        metrics.record_tick(&report(first));
        metrics.record_tick(&report(second));

        assert_eq!(metrics.ticks_completed, 2);
        assert_eq!(
            metrics.baselines[&CurrencyCode::usd()],
            Baseline::new(Decimal::new(131, 0), Decimal::new(134, 0))
        );
    }

    #[test]
    fn test_metrics() {
        let mut metrics = SimulationMetrics::new();

        metrics.reconciled = 2;
        metrics.unchanged = 1;
        metrics.failed = 1;
        metrics.record_abort();
        metrics.record_assertion(true);
        metrics.record_assertion(false);

        assert_eq!(metrics.success_rate(), 0.75);
        assert_eq!(metrics.ticks_aborted, 1);
        assert_eq!(metrics.assertions_passed, 1);
        assert_eq!(metrics.assertions_failed, 1);
    }
}
