//! Cross-institution baselines used as the outlier yardstick.

use std::collections::BTreeMap;

use ratewatch_common::{mean_of, CurrencyCode, Snapshot};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which baseline a quote field is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaselineSide {
    Buying,
    Selling,
}

/// Buying and selling baselines of one currency.
///
/// A zero baseline means no institution has usable data for that side yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Baseline {
    pub buying: Decimal,
    pub selling: Decimal,
}

impl Baseline {
    /// Create a baseline.
    pub fn new(buying: Decimal, selling: Decimal) -> Self {
        Self { buying, selling }
    }

    /// Get one side.
    pub fn side(&self, side: BaselineSide) -> Decimal {
        match side {
            BaselineSide::Buying => self.buying,
            BaselineSide::Selling => self.selling,
        }
    }

    /// Check if neither side has a yardstick.
    pub fn is_empty(&self) -> bool {
        self.buying.is_zero() && self.selling.is_zero()
    }
}

/// Computes baselines from the reconciled snapshot.
///
/// For every institution reporting the currency, the present buying fields
/// are averaged into one value and the present selling fields into another.
/// The baseline of a side is the mean of those per-institution values,
/// skipping institutions where the side is absent or averages to zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaselineEstimator;

impl BaselineEstimator {
    /// Create a new estimator.
    pub fn new() -> Self {
        Self
    }

    /// Baseline of one currency.
    pub fn estimate(&self, snapshot: &Snapshot, currency: &CurrencyCode) -> Baseline {
        let mut buying = Vec::new();
        let mut selling = Vec::new();

        for (_, rates) in snapshot.rates_for(currency) {
            if let Some(avg) = rates.quote.buying_average().filter(|v| !v.is_zero()) {
                buying.push(avg);
            }
            if let Some(avg) = rates.quote.selling_average().filter(|v| !v.is_zero()) {
                selling.push(avg);
            }
        }

        Baseline::new(mean(&buying), mean(&selling))
    }

    /// Baselines of every currency in the snapshot.
    pub fn estimate_all(&self, snapshot: &Snapshot) -> BTreeMap<CurrencyCode, Baseline> {
        snapshot
            .currencies()
            .into_iter()
            .map(|currency| {
                let baseline = self.estimate(snapshot, &currency);
                (currency, baseline)
            })
            .collect()
    }
}

fn mean(values: &[Decimal]) -> Decimal {
    mean_of(values).unwrap_or(Decimal::ZERO)
}
