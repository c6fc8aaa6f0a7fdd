//! Tick runner: schedule, fetch, reconcile and persist.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use ratewatch_common::{
    Clock, CurrencyCode, InstitutionSlug, RateWatchError, Result, Snapshot, TickId, Timestamp,
};
use ratewatch_fx::{Baseline, BaselineEstimator, FxError, InstitutionDescriptor, OutlierPolicy};
use ratewatch_store::{Revision, SnapshotStore, StoreError};

use crate::config::AggregatorConfig;
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use crate::scheduler::StalenessScheduler;
use crate::state::{FailureReason, RefreshOutcome, RefreshState};

/// Outcome of one institution within a tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstitutionOutcome {
    pub institution: InstitutionSlug,
    pub outcome: RefreshOutcome,
}

/// What a tick did.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub tick_id: TickId,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    /// Institutions selected, in processing order.
    pub due: Vec<InstitutionSlug>,
    /// One entry per processed institution, in processing order.
    pub outcomes: Vec<InstitutionOutcome>,
    /// Per-currency baselines of the snapshot as the tick left it.
    pub baselines: BTreeMap<CurrencyCode, Baseline>,
    /// Set when another tick was running and this one did nothing.
    pub skipped: bool,
}

impl TickReport {
    fn skipped(at: Timestamp) -> Self {
        Self {
            tick_id: TickId::new(),
            started_at: at,
            finished_at: at,
            due: Vec::new(),
            outcomes: Vec::new(),
            baselines: BTreeMap::new(),
            skipped: true,
        }
    }

    /// Outcome for an institution, if it was processed.
    pub fn outcome_of(&self, slug: &InstitutionSlug) -> Option<&RefreshOutcome> {
        self.outcomes
            .iter()
            .find(|entry| &entry.institution == slug)
            .map(|entry| &entry.outcome)
    }

    /// Number of institutions whose refresh was persisted.
    pub fn persisted(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|entry| entry.outcome.is_persisted())
            .count()
    }

    /// Number of institutions whose refresh persisted nothing.
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.persisted()
    }
}

/// Clears the in-progress flag when dropped.
struct TickGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> TickGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// The aggregation engine.
///
/// Institutions are processed one at a time, in scheduler order, and each
/// merge re-reads the stored snapshot so that it sees every earlier merge
/// of the same tick.
pub struct Aggregator {
    /// Configuration.
    config: AggregatorConfig,
    /// Snapshot persistence.
    store: Arc<dyn SnapshotStore>,
    /// Time source.
    clock: Arc<dyn Clock>,
    scheduler: StalenessScheduler,
    reconciler: Reconciler,
    metrics: Arc<Metrics>,
    in_progress: AtomicBool,
}

impl Aggregator {
    /// Create a new aggregator.
    pub fn new(
        config: AggregatorConfig,
        store: Arc<dyn SnapshotStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(RateWatchError::ConfigurationError)?;

        let policy = OutlierPolicy::new(config.filter.outlier_band)?;
        let scheduler = StalenessScheduler::from_config(&config.scheduler).ok_or_else(|| {
            RateWatchError::ConfigurationError("staleness threshold out of range".to_string())
        })?;

        Ok(Self {
            scheduler,
            reconciler: Reconciler::new(policy),
            config,
            store,
            clock,
            metrics: Arc::new(Metrics::new()),
            in_progress: AtomicBool::new(false),
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Get the metrics.
    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Current persisted snapshot, empty if none was ever written.
    pub async fn snapshot(&self) -> Result<Snapshot> {
        let stored = self.store.load().await?;
        Ok(stored.map(|s| s.snapshot).unwrap_or_default())
    }

    /// Refresh every institution that is due.
    ///
    /// Adapter failures and write conflicts are confined to the institution
    /// they happened to. An unreachable store or an undecodable document
    /// aborts the tick with an error; whatever was persisted before that
    /// stays persisted.
    pub async fn run_tick(&self, institutions: &[InstitutionDescriptor]) -> Result<TickReport> {
        let Some(_guard) = TickGuard::acquire(&self.in_progress) else {
            warn!("Tick already in progress, skipping");
            self.metrics.tick_skipped();
            return Ok(TickReport::skipped(self.clock.now()));
        };

        let tick_id = TickId::new();
        self.metrics.tick_started();

        match self.tick(tick_id, institutions).await {
            Ok(report) => {
                self.metrics.tick_completed();
                Ok(report)
            }
            Err(e) => {
                error!(tick_id = %tick_id, error = %e, code = e.error_code(), "Tick aborted");
                self.metrics.tick_aborted();
                Err(e)
            }
        }
    }

    #[instrument(skip(self, tick_id, institutions), fields(tick_id = %tick_id))]
    async fn tick(
        &self,
        tick_id: TickId,
        institutions: &[InstitutionDescriptor],
    ) -> Result<TickReport> {
        let started_at = self.clock.now();
        let snapshot = self.snapshot().await?;

        let due = self.scheduler.due(&snapshot, institutions, started_at);
        info!(
            institutions = institutions.len(),
            due = due.len(),
            "Tick started"
        );

        let mut outcomes = Vec::with_capacity(due.len());
        for entry in &due {
            let outcome = self.refresh_institution(entry.descriptor).await?;
            self.metrics.record_outcome(&outcome);
            outcomes.push(InstitutionOutcome {
                institution: entry.slug().clone(),
                outcome,
            });
        }

        let persisted = outcomes.iter().any(|entry| entry.outcome.is_persisted());
        let snapshot = if persisted {
            self.snapshot().await?
        } else {
            snapshot
        };

        let report = TickReport {
            tick_id,
            started_at,
            finished_at: self.clock.now(),
            due: due.iter().map(|entry| entry.slug().clone()).collect(),
            outcomes,
            baselines: BaselineEstimator::new().estimate_all(&snapshot),
            skipped: false,
        };

        info!(
            persisted = report.persisted(),
            failed = report.failed(),
            metrics = ?self.metrics.snapshot(),
            "Tick finished"
        );

        Ok(report)
    }

    /// Refresh a single institution.
    ///
    /// Returns `Err` only for tick-fatal store errors.
    #[instrument(skip(self, descriptor), fields(institution = %descriptor.slug()))]
    async fn refresh_institution(
        &self,
        descriptor: &InstitutionDescriptor,
    ) -> Result<RefreshOutcome> {
        let mut state = RefreshState::Stale;
        advance(&mut state, RefreshState::Refreshing);

        let outcome = self.fetch_and_merge(descriptor).await?;
        advance(&mut state, outcome.state());

        match &outcome {
            RefreshOutcome::Reconciled(summary) => info!(
                changed = summary.changed.len(),
                unchanged = summary.unchanged.len(),
                rejected = summary.rejected.len(),
                "Institution reconciled"
            ),
            RefreshOutcome::Unchanged(_) => info!("Institution refreshed, no value changed"),
            RefreshOutcome::Failed(reason) => warn!(reason = reason.code(), "Institution refresh failed"),
        }

        Ok(outcome)
    }

    async fn fetch_and_merge(&self, descriptor: &InstitutionDescriptor) -> Result<RefreshOutcome> {
        let quotes = match descriptor.fetch().await {
            Ok(Some(quotes)) if !quotes.is_empty() => quotes,
            Ok(_) => return Ok(RefreshOutcome::Failed(FailureReason::NoData)),
            Err(FxError::AdapterPanicked { .. }) => {
                return Ok(RefreshOutcome::Failed(FailureReason::AdapterPanicked))
            }
            Err(e) => {
                warn!(error = %e, "Adapter failed");
                return Ok(RefreshOutcome::Failed(FailureReason::AdapterError(e.to_string())));
            }
        };

        // Re-read so baselines include merges made earlier in this tick.
        let (snapshot, revision) = self.load_latest().await?;
        let now = self.clock.now();

        let reconciliation = self
            .reconciler
            .reconcile(&snapshot, &descriptor.profile, &quotes, now);
        let summary = reconciliation.summary;
        self.metrics.record_screening(&summary);

        let Some(next) = reconciliation.next else {
            return Ok(RefreshOutcome::Failed(FailureReason::NothingAccepted));
        };

        match self.store.save(&next, revision).await {
            Ok(revision) => {
                debug!(revision = %revision, store = self.store.name(), "Snapshot persisted");
            }
            Err(e @ StoreError::Conflict { .. }) => {
                warn!(error = %e, "Snapshot changed during merge, skipping until next tick");
                return Ok(RefreshOutcome::Failed(FailureReason::Conflict));
            }
            Err(e) => return Err(e.into()),
        }

        if summary.changed.is_empty() {
            Ok(RefreshOutcome::Unchanged(summary))
        } else {
            Ok(RefreshOutcome::Reconciled(summary))
        }
    }

    async fn load_latest(&self) -> Result<(Snapshot, Option<Revision>)> {
        Ok(match self.store.load().await? {
            Some(stored) => (stored.snapshot, Some(stored.revision)),
            None => (Snapshot::new(), None),
        })
    }
}

fn advance(state: &mut RefreshState, next: RefreshState) {
    debug_assert!(
        state.can_transition_to(next),
        "invalid refresh transition {state:?} -> {next:?}"
    );
    debug!(from = ?state, to = ?next, "Refresh state");
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use ratewatch_common::{CurrencyCode, InstitutionProfile, ManualClock, QuoteField, RawQuote};
    use ratewatch_common::{CurrencyRates, InstitutionRecord};
    use ratewatch_fx::{MockResponse, MockSourceAdapter, QuoteMap};
    use ratewatch_store::{InMemorySnapshotStore, StoreResult, StoredSnapshot};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tokio_test::{assert_err, assert_ok};

    /// Lets a rival writer replace the document right after the given load.
    struct RacingStore {
        inner: Arc<InMemorySnapshotStore>,
        loads: AtomicUsize,
        race_after_load: usize,
        rival: Mutex<Option<Snapshot>>,
    }

    #[async_trait::async_trait]
    impl SnapshotStore for RacingStore {
        fn name(&self) -> &str {
            "racing"
        }

        async fn load(&self) -> StoreResult<Option<StoredSnapshot>> {
            let loaded = self.inner.load().await?;
            let n = self.loads.fetch_add(1, Ordering::SeqCst) + 1;
            if n == self.race_after_load {
                if let Some(rival) = self.rival.lock().unwrap().take() {
                    self.inner.replace(rival);
                }
            }
            Ok(loaded)
        }

        async fn save(&self, snapshot: &Snapshot, expected: Option<Revision>) -> StoreResult<Revision> {
            self.inner.save(snapshot, expected).await
        }
    }

    fn record(slug: &str, quote: RawQuote, at: Timestamp) -> InstitutionRecord {
        let mut record =
            InstitutionRecord::new(InstitutionProfile::new(slug, slug.to_uppercase(), slug, ""));
        record.updated_at = Some(at);
        record.rates.insert(CurrencyCode::usd(), CurrencyRates::new(quote, at));
        record
    }

    struct Harness {
        aggregator: Aggregator,
        store: Arc<InMemorySnapshotStore>,
        clock: Arc<ManualClock>,
        adapter: Arc<MockSourceAdapter>,
        institutions: Vec<InstitutionDescriptor>,
    }

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap()
    }

    fn harness(slugs: &[&str]) -> Harness {
        let store = Arc::new(InMemorySnapshotStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let adapter = Arc::new(MockSourceAdapter::new("mock"));
        let institutions = slugs
            .iter()
            .map(|slug| {
                let profile =
                    InstitutionProfile::new(*slug, slug.to_uppercase(), *slug, slug.to_uppercase());
                InstitutionDescriptor::new(profile, adapter.clone())
            })
            .collect();
        let aggregator =
            Aggregator::new(AggregatorConfig::default(), store.clone(), clock.clone()).unwrap();

        Harness {
            aggregator,
            store,
            clock,
            adapter,
            institutions,
        }
    }

    fn usd(quote: RawQuote) -> QuoteMap {
        let mut quotes = QuoteMap::new();
        quotes.insert(CurrencyCode::usd(), quote);
        quotes
    }

    fn usd_rates(snapshot: &Snapshot, slug: &str) -> ratewatch_common::CurrencyRates {
        snapshot
            .institution(&slug.into())
            .unwrap()
            .rates_for(&CurrencyCode::usd())
            .unwrap()
            .clone()
    }

    #[tokio::test]
    async fn test_first_tick_bootstraps_empty_snapshot() {
        let h = harness(&["cbe", "awash"]);
        h.adapter.set_quotes("cbe", usd(RawQuote::cash(dec!(130), dec!(133))));
        h.adapter.set_quotes("awash", usd(RawQuote::cash(dec!(131), dec!(134))));

        let report = h.aggregator.run_tick(&h.institutions).await.unwrap();

        assert_eq!(report.due.len(), 2);
        assert_eq!(report.persisted(), 2);
        let snapshot = h.store.snapshot().unwrap();
        assert_eq!(snapshot.updated_at_of(&"cbe".into()), Some(t0()));
        assert_eq!(snapshot.updated_at_of(&"awash".into()), Some(t0()));
    }

    #[tokio::test]
    async fn test_immediate_second_tick_is_noop() {
        let h = harness(&["cbe"]);
        h.adapter.set_quotes("cbe", usd(RawQuote::cash(dec!(130), dec!(133))));

        assert_ok!(h.aggregator.run_tick(&h.institutions).await);
        let saves = h.store.save_count();
        let report = h.aggregator.run_tick(&h.institutions).await.unwrap();

        assert!(report.due.is_empty());
        assert_eq!(h.store.save_count(), saves);
        assert_eq!(h.adapter.calls(&"cbe".into()), 1);
    }

    #[tokio::test]
    async fn test_identical_data_only_moves_updated_at() {
        let h = harness(&["cbe"]);
        h.adapter.set_quotes("cbe", usd(RawQuote::cash(dec!(130), dec!(133))));

        assert_ok!(h.aggregator.run_tick(&h.institutions).await);
        h.clock.advance(Duration::minutes(20));
        let report = h.aggregator.run_tick(&h.institutions).await.unwrap();

        assert!(matches!(
            report.outcome_of(&"cbe".into()),
            Some(RefreshOutcome::Unchanged(_))
        ));
        let snapshot = h.store.snapshot().unwrap();
        assert_eq!(usd_rates(&snapshot, "cbe").last_changed_at, Some(t0()));
        assert_eq!(
            snapshot.updated_at_of(&"cbe".into()),
            Some(t0() + Duration::minutes(20))
        );
    }

    #[tokio::test]
    async fn test_staleness_threshold_gates_refresh() {
        let h = harness(&["cbe"]);
        h.adapter.set_quotes("cbe", usd(RawQuote::cash(dec!(130), dec!(133))));
        assert_ok!(h.aggregator.run_tick(&h.institutions).await);

        h.clock.advance(Duration::minutes(9));
        let report = h.aggregator.run_tick(&h.institutions).await.unwrap();
        assert!(report.due.is_empty());

        h.clock.advance(Duration::minutes(1));
        let report = h.aggregator.run_tick(&h.institutions).await.unwrap();
        assert_eq!(report.due, vec![InstitutionSlug::from("cbe")]);
    }

    #[tokio::test]
    async fn test_outlier_rejected_and_prior_value_kept() {
        let h = harness(&["cbe"]);
        h.adapter.set_quotes("cbe", usd(RawQuote::cash(dec!(100), dec!(100))));
        assert_ok!(h.aggregator.run_tick(&h.institutions).await);

        h.clock.advance(Duration::minutes(20));
        h.adapter.set_quotes("cbe", usd(RawQuote::cash(dec!(125), dec!(100))));
        assert_ok!(h.aggregator.run_tick(&h.institutions).await);
        let rates = usd_rates(&h.store.snapshot().unwrap(), "cbe");
        assert_eq!(rates.get(QuoteField::CashBuying), Some(dec!(100)));

        h.clock.advance(Duration::minutes(20));
        h.adapter.set_quotes("cbe", usd(RawQuote::cash(dec!(115), dec!(100))));
        assert_ok!(h.aggregator.run_tick(&h.institutions).await);
        let rates = usd_rates(&h.store.snapshot().unwrap(), "cbe");
        assert_eq!(rates.get(QuoteField::CashBuying), Some(dec!(115)));
        assert_eq!(h.aggregator.metrics().snapshot().fields_rejected, 1);
    }

    #[tokio::test]
    async fn test_merge_is_visible_to_next_baseline_in_same_tick() {
        let h = harness(&["cbe", "awash"]);
        h.adapter.set_quotes("cbe", usd(RawQuote::cash(dec!(100), dec!(100))));
        h.adapter.set_quotes("awash", usd(RawQuote::cash(dec!(150), dec!(150))));

        let report = h.aggregator.run_tick(&h.institutions).await.unwrap();

        assert_eq!(
            report.outcome_of(&"awash".into()),
            Some(&RefreshOutcome::Failed(FailureReason::NothingAccepted))
        );
        let snapshot = h.store.snapshot().unwrap();
        assert!(snapshot.institution(&"awash".into()).is_none());
    }

    #[tokio::test]
    async fn test_conflict_does_not_stop_later_institutions() {
        let h = harness(&["cbe", "awash"]);
        h.adapter.set_quotes("cbe", usd(RawQuote::cash(dec!(130), dec!(133))));
        h.adapter.set_quotes("awash", usd(RawQuote::cash(dec!(131), dec!(134))));
        h.store.fail_next_saves(1);

        let report = h.aggregator.run_tick(&h.institutions).await.unwrap();

        assert_eq!(
            report.outcome_of(&"cbe".into()),
            Some(&RefreshOutcome::Failed(FailureReason::Conflict))
        );
        assert!(report.outcome_of(&"awash".into()).unwrap().is_persisted());
        let snapshot = h.store.snapshot().unwrap();
        assert!(snapshot.institution(&"cbe".into()).is_none());
        assert!(snapshot.institution(&"awash".into()).is_some());
        assert_eq!(h.aggregator.metrics().snapshot().store_conflicts, 1);
    }

    #[tokio::test]
    async fn test_concurrent_writer_wins_and_is_kept() {
        let inner = Arc::new(InMemorySnapshotStore::new());
        let rival = Snapshot::new().with_institution(
            record("nbe", RawQuote::cash(dec!(130), dec!(133)), t0()),
            t0(),
        );
        // Load 1 starts the tick, load 2 is cbe's re-read before its save.
        let store = Arc::new(RacingStore {
            inner: inner.clone(),
            loads: AtomicUsize::new(0),
            race_after_load: 2,
            rival: Mutex::new(Some(rival)),
        });
        let clock = Arc::new(ManualClock::new(t0()));
        let adapter = Arc::new(MockSourceAdapter::new("mock"));
        adapter.set_quotes("cbe", usd(RawQuote::cash(dec!(131), dec!(134))));
        let institutions = vec![InstitutionDescriptor::new(
            InstitutionProfile::new("cbe", "CBE", "cbe", "CBE"),
            adapter.clone(),
        )];
        let aggregator = Aggregator::new(AggregatorConfig::default(), store, clock).unwrap();

        let report = aggregator.run_tick(&institutions).await.unwrap();

        assert_eq!(
            report.outcome_of(&"cbe".into()),
            Some(&RefreshOutcome::Failed(FailureReason::Conflict))
        );
        let snapshot = inner.snapshot().unwrap();
        assert!(snapshot.institution(&"nbe".into()).is_some());
        assert!(snapshot.institution(&"cbe".into()).is_none());
        assert_eq!(inner.save_count(), 0);

        // Still due, and merged on top of the rival's write.
        let report = aggregator.run_tick(&institutions).await.unwrap();
        assert!(report.outcome_of(&"cbe".into()).unwrap().is_persisted());
        let snapshot = inner.snapshot().unwrap();
        assert!(snapshot.institution(&"nbe".into()).is_some());
        assert!(snapshot.institution(&"cbe".into()).is_some());
    }

    #[tokio::test]
    async fn test_absurd_values_never_crash_a_tick() {
        let h = harness(&["cbe", "awash"]);
        h.adapter.set_quotes("cbe", usd(RawQuote::cash(Decimal::MAX, Decimal::MAX)));
        h.adapter.set_quotes("awash", usd(RawQuote::cash(dec!(130), dec!(133))));

        let report = h.aggregator.run_tick(&h.institutions).await.unwrap();

        assert_eq!(
            report.outcome_of(&"cbe".into()),
            Some(&RefreshOutcome::Failed(FailureReason::NothingAccepted))
        );
        assert!(report.outcome_of(&"awash".into()).unwrap().is_persisted());
        assert_eq!(h.aggregator.metrics().snapshot().fields_malformed, 2);

        // A document already holding such values is screened without panicking.
        let poisoned = h.store.snapshot().unwrap().with_institution(
            record("dashen", RawQuote::cash(Decimal::MAX, Decimal::MAX), t0()),
            t0(),
        );
        h.store.replace(poisoned);
        h.clock.advance(Duration::minutes(20));
        h.adapter.set_quotes("cbe", usd(RawQuote::cash(dec!(130), dec!(133))));

        assert_ok!(h.aggregator.run_tick(&h.institutions).await);
    }

    #[tokio::test]
    async fn test_report_carries_final_baselines() {
        let h = harness(&["cbe", "awash"]);
        h.adapter.set_quotes("cbe", usd(RawQuote::cash(dec!(100), dec!(102))));
        h.adapter.set_quotes("awash", usd(RawQuote::cash(dec!(110), dec!(112))));

        let report = h.aggregator.run_tick(&h.institutions).await.unwrap();

        let usd = report.baselines[&CurrencyCode::usd()];
        assert_eq!(usd.buying, dec!(105));
        assert_eq!(usd.selling, dec!(107));

        let json = serde_json::to_value(&report).unwrap();
        assert!(json["baselines"]["USD"]["selling"].is_string());
    }

    #[tokio::test]
    async fn test_corrupt_document_aborts_tick_untouched() {
        let h = harness(&["cbe"]);
        h.adapter.set_quotes("cbe", usd(RawQuote::cash(dec!(130), dec!(133))));
        assert_ok!(h.aggregator.run_tick(&h.institutions).await);
        let before = h.store.snapshot();
        let saves = h.store.save_count();

        h.clock.advance(Duration::minutes(20));
        h.adapter.set_quotes("cbe", usd(RawQuote::cash(dec!(131), dec!(134))));
        h.store.set_corrupt(true);
        let err = assert_err!(h.aggregator.run_tick(&h.institutions).await);

        assert!(matches!(err, RateWatchError::CorruptSnapshot(_)));
        assert!(err.is_tick_fatal());
        assert_eq!(h.store.save_count(), saves);
        assert_eq!(h.store.snapshot(), before);
        assert_eq!(h.adapter.calls(&"cbe".into()), 1);
        assert_eq!(h.aggregator.metrics().snapshot().ticks_aborted, 1);
    }

    #[tokio::test]
    async fn test_adapter_failures_are_isolated() {
        let h = harness(&["cbe", "awash", "dashen", "zemen"]);
        h.adapter.set_response("cbe", MockResponse::Panic);
        h.adapter.set_response("awash", MockResponse::Fail("timeout".to_string()));
        h.adapter.set_response("dashen", MockResponse::NoData);
        h.adapter.set_quotes("zemen", usd(RawQuote::cash(dec!(130), dec!(133))));

        let report = h.aggregator.run_tick(&h.institutions).await.unwrap();

        assert_eq!(
            report.outcome_of(&"cbe".into()),
            Some(&RefreshOutcome::Failed(FailureReason::AdapterPanicked))
        );
        assert!(matches!(
            report.outcome_of(&"awash".into()),
            Some(RefreshOutcome::Failed(FailureReason::AdapterError(_)))
        ));
        assert_eq!(
            report.outcome_of(&"dashen".into()),
            Some(&RefreshOutcome::Failed(FailureReason::NoData))
        );
        assert_eq!(report.persisted(), 1);
        assert_eq!(report.failed(), 3);

        // Failed institutions stay due.
        let next = h.aggregator.run_tick(&h.institutions).await.unwrap();
        assert_eq!(next.due.len(), 3);
    }

    #[tokio::test]
    async fn test_unavailable_store_aborts_tick() {
        let h = harness(&["cbe"]);
        h.adapter.set_quotes("cbe", usd(RawQuote::cash(dec!(130), dec!(133))));
        h.store.set_available(false);

        let err = assert_err!(h.aggregator.run_tick(&h.institutions).await);

        assert!(err.is_tick_fatal());
        assert_eq!(h.aggregator.metrics().snapshot().ticks_aborted, 1);

        // The next tick starts from scratch.
        h.store.set_available(true);
        let report = h.aggregator.run_tick(&h.institutions).await.unwrap();
        assert_eq!(report.persisted(), 1);
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let h = harness(&["cbe"]);
        h.aggregator.in_progress.store(true, Ordering::SeqCst);

        let report = h.aggregator.run_tick(&h.institutions).await.unwrap();

        assert!(report.skipped);
        assert_eq!(h.adapter.calls(&"cbe".into()), 0);
        assert_eq!(h.aggregator.metrics().snapshot().ticks_skipped, 1);
    }

    #[test]
    fn test_tick_guard_releases_on_drop() {
        let flag = AtomicBool::new(false);
        {
            let _guard = TickGuard::acquire(&flag).unwrap();
            assert!(TickGuard::acquire(&flag).is_none());
        }
        assert!(TickGuard::acquire(&flag).is_some());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = AggregatorConfig::default();
        config.filter.outlier_band = dec!(2);

        let result = Aggregator::new(
            config,
            Arc::new(InMemorySnapshotStore::new()),
            Arc::new(ManualClock::new(t0())),
        );

        assert!(matches!(result, Err(RateWatchError::ConfigurationError(_))));
    }

    #[tokio::test]
    async fn test_report_serialises_outcomes() {
        let h = harness(&["cbe"]);
        h.adapter.set_quotes("cbe", usd(RawQuote::cash(dec!(130), dec!(133))));

        let report = h.aggregator.run_tick(&h.institutions).await.unwrap();
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["outcomes"][0]["institution"], "cbe");
        assert_eq!(json["outcomes"][0]["outcome"]["outcome"], "RECONCILED");
        assert_eq!(json["skipped"], false);
    }
}
