//! Simulation controller.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};

use ratewatch_aggregator::{catalogue, Aggregator, AggregatorConfig, RefreshOutcome, TickReport};
use ratewatch_common::{Clock, CurrencyCode, InstitutionSlug, ManualClock, QuoteField};
use ratewatch_fx::InstitutionDescriptor;
use ratewatch_store::InMemorySnapshotStore;

use crate::bank::{MarketNoise, SimulatedMarket};
use crate::metrics::SimulationMetrics;
use crate::scenario::{AssertCondition, FaultType, Scenario, ScenarioStep};

/// Controls the simulation.
pub struct SimulationController {
    /// Simulated time.
    clock: Arc<ManualClock>,
    /// Snapshot store with fault injection.
    store: Arc<InMemorySnapshotStore>,
    /// Simulated banks.
    market: Arc<SimulatedMarket>,
    aggregator: Aggregator,
    institutions: Vec<InstitutionDescriptor>,
    /// Clock advance between ticks in continuous mode.
    minutes_per_tick: i64,
    /// Result of the last tick: a report, or `None` if it was aborted.
    last_tick: Option<TickReport>,
    metrics: SimulationMetrics,
}

impl SimulationController {
    /// Create a new simulation controller.
    pub fn new(
        institution_count: usize,
        minutes_per_tick: i64,
        noise: MarketNoise,
        seed: Option<u64>,
    ) -> anyhow::Result<Self> {
        let known = catalogue::default_catalogue();
        if institution_count == 0 || institution_count > known.len() {
            anyhow::bail!(
                "institution count must be between 1 and {}, got {}",
                known.len(),
                institution_count
            );
        }

        let profiles: Vec<_> = known.into_iter().take(institution_count).collect();
        let market = Arc::new(SimulatedMarket::new(&profiles, noise, seed));
        let institutions = catalogue::descriptors(profiles, market.clone());

        let start = Utc.with_ymd_and_hms(2024, 7, 1, 6, 0, 0).single().unwrap_or_else(Utc::now);
        let clock = Arc::new(ManualClock::new(start));
        let store = Arc::new(InMemorySnapshotStore::new());
        let aggregator = Aggregator::new(AggregatorConfig::default(), store.clone(), clock.clone())?;

        info!("Initialized simulation with {} institutions", institution_count);

        Ok(Self {
            clock,
            store,
            market,
            aggregator,
            institutions,
            minutes_per_tick,
            last_tick: None,
            metrics: SimulationMetrics::new(),
        })
    }

    /// Run `ticks` ticks, advancing the clock between them.
    pub async fn run(&mut self, ticks: u64) -> anyhow::Result<()> {
        info!(
            "Running {} ticks, {} simulated minutes apart",
            ticks, self.minutes_per_tick
        );

        for _ in 0..ticks {
            self.tick().await;
            self.clock.advance(Duration::minutes(self.minutes_per_tick));
        }

        Ok(())
    }

    /// Run a scenario without random noise.
    pub async fn run_scenario(&mut self, scenario: Scenario) -> anyhow::Result<()> {
        info!("Running scenario: {} - {}", scenario.name, scenario.description);

        for target in scenario.targets() {
            let slug = InstitutionSlug::from(target);
            if !self.institutions.iter().any(|d| d.slug() == &slug) {
                anyhow::bail!(
                    "scenario refers to '{}', which is not among the simulated institutions",
                    target
                );
            }
        }

        self.market
            .set_noise(MarketNoise {
                outlier_rate: 0.0,
                failure_rate: 0.0,
            })
            .await;

        for step in &scenario.steps {
            self.execute_step(step).await?;
        }

        if self.metrics.assertions_failed > 0 {
            anyhow::bail!(
                "{} of {} assertions failed",
                self.metrics.assertions_failed,
                self.metrics.assertions_failed + self.metrics.assertions_passed
            );
        }

        Ok(())
    }

    /// Execute a single scenario step.
    async fn execute_step(&mut self, step: &ScenarioStep) -> anyhow::Result<()> {
        match step {
            ScenarioStep::Tick => self.tick().await,
            ScenarioStep::Advance { minutes } => {
                info!("Advancing clock {} minutes", minutes);
                self.clock.advance(Duration::minutes(*minutes));
            }
            ScenarioStep::InjectFault { fault_type, target } => {
                info!("Injecting fault {:?} on {}", fault_type, target);
                let slug = InstitutionSlug::from(target.as_str());
                match fault_type {
                    FaultType::BankOffline => {
                        self.market.set_offline(&slug, true).await;
                    }
                    FaultType::Outlier { factor } => {
                        self.market.force_outlier(&slug, Some(*factor)).await;
                    }
                    FaultType::StoreConflict { count } => self.store.fail_next_saves(*count),
                    FaultType::StoreUnavailable => self.store.set_available(false),
                }
            }
            ScenarioStep::ClearFault { target } => {
                info!("Clearing fault on {}", target);
                if target == "store" {
                    self.store.fail_next_saves(0);
                    self.store.set_available(true);
                } else {
                    let slug = InstitutionSlug::from(target.as_str());
                    self.market.set_offline(&slug, false).await;
                    self.market.force_outlier(&slug, None).await;
                }
            }
            ScenarioStep::Assert { condition } => {
                let passed = self.check(condition).await?;
                if passed {
                    info!("Assertion held: {:?}", condition);
                } else {
                    warn!("Assertion failed: {:?}", condition);
                }
                self.metrics.record_assertion(passed);
            }
        }

        Ok(())
    }

    async fn tick(&mut self) {
        self.market.step().await;

        match self.aggregator.run_tick(&self.institutions).await {
            Ok(report) => {
                info!(
                    "Tick at {}: {} due, {} persisted, {} failed",
                    report.started_at,
                    report.due.len(),
                    report.persisted(),
                    report.failed()
                );
                self.metrics.record_tick(&report);
                self.last_tick = Some(report);
            }
            Err(e) => {
                warn!("Tick at {} aborted: {}", self.clock.now(), e);
                self.metrics.record_abort();
                self.last_tick = None;
            }
        }
    }

    async fn check(&self, condition: &AssertCondition) -> anyhow::Result<bool> {
        let outcome_of = |institution: &str| {
            self.last_tick
                .as_ref()
                .and_then(|report| report.outcome_of(&InstitutionSlug::from(institution)))
        };

        Ok(match condition {
            AssertCondition::Refreshed { institution } => {
                outcome_of(institution.as_str()).is_some_and(RefreshOutcome::is_persisted)
            }
            AssertCondition::RefreshFailed {
                institution,
                reason,
            } => matches!(
                outcome_of(institution.as_str()),
                Some(RefreshOutcome::Failed(failure)) if failure.code() == reason.as_str()
            ),
            AssertCondition::NotDue { institution } => {
                let slug = InstitutionSlug::from(institution.as_str());
                self.last_tick
                    .as_ref()
                    .is_some_and(|report| !report.due.contains(&slug))
            }
            AssertCondition::Persisted { institution } => self
                .store
                .snapshot()
                .is_some_and(|s| s.institution(&InstitutionSlug::from(institution.as_str())).is_some()),
            AssertCondition::RatesNearMid {
                currency,
                tolerance,
            } => self.rates_near_mid(&CurrencyCode::new(currency), *tolerance).await?,
            AssertCondition::TickAborted => self.last_tick.is_none(),
        })
    }

    async fn rates_near_mid(&self, currency: &CurrencyCode, tolerance: f64) -> anyhow::Result<bool> {
        let Some(mid) = self.market.mid(currency).await else {
            anyhow::bail!("market does not quote {}", currency);
        };
        let Some(snapshot) = self.store.snapshot() else {
            return Ok(false);
        };
        let tolerance = Decimal::from_f64_retain(tolerance)
            .ok_or_else(|| anyhow::anyhow!("invalid tolerance {}", tolerance))?;
        let limit = mid * tolerance;

        let mut within = true;
        for (slug, rates) in snapshot.rates_for(currency) {
            for field in QuoteField::ALL {
                if let Some(value) = rates.get(field) {
                    if (value - mid).abs() > limit {
                        warn!("{} {} {} = {} is far from mid {}", slug, currency, field, value, mid);
                        within = false;
                    }
                }
            }
        }

        Ok(within)
    }

    /// Get simulation metrics.
    pub fn get_metrics(&self) -> &SimulationMetrics {
        &self.metrics
    }

    /// Get the engine's own counters.
    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }
}
