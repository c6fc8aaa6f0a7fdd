//! Counters for aggregator monitoring.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::reconciler::MergeSummary;
use crate::state::{FailureReason, RefreshOutcome};

/// Aggregator metrics.
pub struct Metrics {
    /// Ticks started.
    pub ticks_started: AtomicU64,
    /// Ticks run to completion.
    pub ticks_total: AtomicU64,
    /// Ticks skipped because one was already running.
    pub ticks_skipped: AtomicU64,
    /// Ticks aborted by a store failure.
    pub ticks_aborted: AtomicU64,
    /// Institutions attempted.
    pub refreshes_total: AtomicU64,
    /// Refreshes persisted with at least one changed value.
    pub refreshes_reconciled: AtomicU64,
    /// Refreshes persisted with identical values.
    pub refreshes_unchanged: AtomicU64,
    /// Refreshes that persisted nothing.
    pub refreshes_failed: AtomicU64,
    /// Adapter panics caught.
    pub adapter_panics: AtomicU64,
    /// Lost optimistic-concurrency races.
    pub store_conflicts: AtomicU64,
    /// Fields dropped as outliers.
    pub fields_rejected: AtomicU64,
    /// Non-positive fields ignored.
    pub fields_malformed: AtomicU64,
    /// Currencies whose persisted values changed.
    pub currencies_changed: AtomicU64,
}

impl Metrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            ticks_started: AtomicU64::new(0),
            ticks_total: AtomicU64::new(0),
            ticks_skipped: AtomicU64::new(0),
            ticks_aborted: AtomicU64::new(0),
            refreshes_total: AtomicU64::new(0),
            refreshes_reconciled: AtomicU64::new(0),
            refreshes_unchanged: AtomicU64::new(0),
            refreshes_failed: AtomicU64::new(0),
            adapter_panics: AtomicU64::new(0),
            store_conflicts: AtomicU64::new(0),
            fields_rejected: AtomicU64::new(0),
            fields_malformed: AtomicU64::new(0),
            currencies_changed: AtomicU64::new(0),
        }
    }

    /// Record a started tick.
    pub fn tick_started(&self) {
        self.ticks_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed tick.
    pub fn tick_completed(&self) {
        self.ticks_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a skipped tick.
    pub fn tick_skipped(&self) {
        self.ticks_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an aborted tick.
    pub fn tick_aborted(&self) {
        self.ticks_aborted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record screening results, whether or not the merge was persisted.
    pub fn record_screening(&self, summary: &MergeSummary) {
        self.fields_rejected
            .fetch_add(summary.rejected.len() as u64, Ordering::Relaxed);
        self.fields_malformed
            .fetch_add(summary.malformed as u64, Ordering::Relaxed);
    }

    /// Record the outcome of one institution refresh.
    pub fn record_outcome(&self, outcome: &RefreshOutcome) {
        self.refreshes_total.fetch_add(1, Ordering::Relaxed);

        if let Some(summary) = outcome.summary() {
            self.currencies_changed
                .fetch_add(summary.changed.len() as u64, Ordering::Relaxed);
        }

        match outcome {
            RefreshOutcome::Reconciled(_) => {
                self.refreshes_reconciled.fetch_add(1, Ordering::Relaxed);
            }
            RefreshOutcome::Unchanged(_) => {
                self.refreshes_unchanged.fetch_add(1, Ordering::Relaxed);
            }
            RefreshOutcome::Failed(reason) => {
                self.refreshes_failed.fetch_add(1, Ordering::Relaxed);
                match reason {
                    FailureReason::AdapterPanicked => {
                        self.adapter_panics.fetch_add(1, Ordering::Relaxed);
                    }
                    FailureReason::Conflict => {
                        self.store_conflicts.fetch_add(1, Ordering::Relaxed);
                    }
                    _ => {}
                }
            }
        }
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ticks_started: self.ticks_started.load(Ordering::Relaxed),
            ticks_total: self.ticks_total.load(Ordering::Relaxed),
            ticks_skipped: self.ticks_skipped.load(Ordering::Relaxed),
            ticks_aborted: self.ticks_aborted.load(Ordering::Relaxed),
            refreshes_total: self.refreshes_total.load(Ordering::Relaxed),
            refreshes_reconciled: self.refreshes_reconciled.load(Ordering::Relaxed),
            refreshes_unchanged: self.refreshes_unchanged.load(Ordering::Relaxed),
            refreshes_failed: self.refreshes_failed.load(Ordering::Relaxed),
            adapter_panics: self.adapter_panics.load(Ordering::Relaxed),
            store_conflicts: self.store_conflicts.load(Ordering::Relaxed),
            fields_rejected: self.fields_rejected.load(Ordering::Relaxed),
            fields_malformed: self.fields_malformed.load(Ordering::Relaxed),
            currencies_changed: self.currencies_changed.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus text format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        format!(
            r#"# HELP ratewatch_ticks_started Ticks started
# TYPE ratewatch_ticks_started counter
ratewatch_ticks_started {}

# HELP ratewatch_ticks_total Ticks run to completion
# TYPE ratewatch_ticks_total counter
ratewatch_ticks_total {}

# HELP ratewatch_ticks_skipped Ticks skipped while another was running
# TYPE ratewatch_ticks_skipped counter
ratewatch_ticks_skipped {}

# HELP ratewatch_ticks_aborted Ticks aborted by a store failure
# TYPE ratewatch_ticks_aborted counter
ratewatch_ticks_aborted {}

# HELP ratewatch_refreshes_total Institution refreshes attempted
# TYPE ratewatch_refreshes_total counter
ratewatch_refreshes_total {}

# HELP ratewatch_refreshes_reconciled Refreshes that changed at least one value
# TYPE ratewatch_refreshes_reconciled counter
ratewatch_refreshes_reconciled {}

# HELP ratewatch_refreshes_unchanged Refreshes persisted with identical values
# TYPE ratewatch_refreshes_unchanged counter
ratewatch_refreshes_unchanged {}

# HELP ratewatch_refreshes_failed Refreshes that persisted nothing
# TYPE ratewatch_refreshes_failed counter
ratewatch_refreshes_failed {}

# HELP ratewatch_adapter_panics Adapter panics caught
# TYPE ratewatch_adapter_panics counter
ratewatch_adapter_panics {}

# HELP ratewatch_store_conflicts Lost snapshot write races
# TYPE ratewatch_store_conflicts counter
ratewatch_store_conflicts {}

# HELP ratewatch_fields_rejected Quote fields dropped as outliers
# TYPE ratewatch_fields_rejected counter
ratewatch_fields_rejected {}

# HELP ratewatch_fields_malformed Non-positive or unbandable quote fields ignored
# TYPE ratewatch_fields_malformed counter
ratewatch_fields_malformed {}

# HELP ratewatch_currencies_changed Currencies whose persisted values changed
# TYPE ratewatch_currencies_changed counter
ratewatch_currencies_changed {}
"#,
            snapshot.ticks_started,
            snapshot.ticks_total,
            snapshot.ticks_skipped,
            snapshot.ticks_aborted,
            snapshot.refreshes_total,
            snapshot.refreshes_reconciled,
            snapshot.refreshes_unchanged,
            snapshot.refreshes_failed,
            snapshot.adapter_panics,
            snapshot.store_conflicts,
            snapshot.fields_rejected,
            snapshot.fields_malformed,
            snapshot.currencies_changed,
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub ticks_started: u64,
    pub ticks_total: u64,
    pub ticks_skipped: u64,
    pub ticks_aborted: u64,
    pub refreshes_total: u64,
    pub refreshes_reconciled: u64,
    pub refreshes_unchanged: u64,
    pub refreshes_failed: u64,
    pub adapter_panics: u64,
    pub store_conflicts: u64,
    pub fields_rejected: u64,
    pub fields_malformed: u64,
    pub currencies_changed: u64,
}
