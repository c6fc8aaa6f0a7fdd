//! Field-level merge of screened quotes into the snapshot.
//!
//! Invariants kept by [`Reconciler::reconcile`]:
//! - a field that was not accepted this time keeps its persisted value;
//! - `last_changed_at` of a currency moves only when an accepted value
//!   differs from the persisted one;
//! - the institution's `updated_at` moves whenever anything was accepted;
//! - the input snapshot is never modified, other institutions pass through.

use ratewatch_common::{
    CurrencyCode, CurrencyRates, InstitutionProfile, InstitutionRecord, RawQuote, Snapshot,
    Timestamp,
};
use ratewatch_fx::{BaselineEstimator, OutlierPolicy, QuoteMap, RejectedField};
use serde::Serialize;
use tracing::debug;

/// What a merge did, per currency.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    /// Currencies whose values changed.
    pub changed: Vec<CurrencyCode>,
    /// Currencies refreshed with identical values.
    pub unchanged: Vec<CurrencyCode>,
    /// Currencies where nothing survived screening.
    pub skipped: Vec<CurrencyCode>,
    /// Fields dropped as outliers.
    pub rejected: Vec<(CurrencyCode, RejectedField)>,
    /// Number of non-positive or unbandable fields ignored.
    pub malformed: usize,
}

impl MergeSummary {
    /// Check if any currency was merged.
    pub fn is_usable(&self) -> bool {
        !self.changed.is_empty() || !self.unchanged.is_empty()
    }
}

/// Result of reconciling one institution's quotes.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    /// Snapshot to persist, `None` when nothing usable was reported.
    pub next: Option<Snapshot>,
    /// Merge details.
    pub summary: MergeSummary,
}

/// Screens and merges one institution's quotes at a time.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    estimator: BaselineEstimator,
    policy: OutlierPolicy,
}

impl Reconciler {
    /// Create a reconciler with the given outlier policy.
    pub fn new(policy: OutlierPolicy) -> Self {
        Self {
            estimator: BaselineEstimator::new(),
            policy,
        }
    }

    /// Merge `quotes` for `profile` into `snapshot`.
    ///
    /// Baselines are taken from `snapshot`, which should be the freshest
    /// persisted state.
    pub fn reconcile(
        &self,
        snapshot: &Snapshot,
        profile: &InstitutionProfile,
        quotes: &QuoteMap,
        now: Timestamp,
    ) -> Reconciliation {
        let mut summary = MergeSummary::default();
        let mut record = snapshot
            .institution(&profile.slug)
            .cloned()
            .unwrap_or_else(|| InstitutionRecord::new(profile.clone()));

        for (currency, quote) in quotes {
            let baseline = self.estimator.estimate(snapshot, currency);
            let screened = self.policy.screen_quote(currency, quote, &baseline);

            summary.malformed += screened.malformed.len();
            summary
                .rejected
                .extend(screened.rejected.iter().map(|r| (currency.clone(), *r)));

            if screened.is_empty() {
                debug!(
                    institution = %profile.slug,
                    currency = %currency,
                    "Nothing accepted, keeping persisted rates"
                );
                summary.skipped.push(currency.clone());
                continue;
            }

            let (rates, changed) =
                merge_rates(record.rates.get(currency), &screened.accepted, now);
            record.rates.insert(currency.clone(), rates);

            if changed {
                summary.changed.push(currency.clone());
            } else {
                summary.unchanged.push(currency.clone());
            }
        }

        if !summary.is_usable() {
            return Reconciliation {
                next: None,
                summary,
            };
        }

        record.profile = profile.clone();
        record.updated_at = Some(now);

        Reconciliation {
            next: Some(snapshot.with_institution(record, now)),
            summary,
        }
    }
}

/// Overlay accepted fields on the persisted rates of one currency.
///
/// Returns the merged rates and whether any value changed. A currency seen
/// for the first time always counts as changed.
pub fn merge_rates(
    prior: Option<&CurrencyRates>,
    accepted: &RawQuote,
    now: Timestamp,
) -> (CurrencyRates, bool) {
    let mut quote = prior.map(|rates| rates.quote.clone()).unwrap_or_default();
    let mut changed = prior.is_none();

    for (field, value) in accepted.fields() {
        if quote.get(field) != Some(value) {
            changed = true;
        }
        quote.set(field, Some(value));
    }

    let last_changed_at = if changed {
        Some(now)
    } else {
        prior.and_then(|rates| rates.last_changed_at)
    };

    (
        CurrencyRates {
            quote,
            last_changed_at,
        },
        changed,
    )
}
