//! Quote and rate types for RateWatch.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Timestamp;

/// One of the four numeric slots an institution may report for a currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QuoteField {
    /// Buying rate for cash notes.
    CashBuying,
    /// Selling rate for cash notes.
    CashSelling,
    /// Buying rate for transfers.
    TransactionalBuying,
    /// Selling rate for transfers.
    TransactionalSelling,
}

impl QuoteField {
    /// All fields, in document order.
    pub const ALL: [QuoteField; 4] = [
        QuoteField::CashBuying,
        QuoteField::CashSelling,
        QuoteField::TransactionalBuying,
        QuoteField::TransactionalSelling,
    ];

    /// Field name as it appears in the persisted document.
    pub fn name(&self) -> &'static str {
        match self {
            QuoteField::CashBuying => "cashBuying",
            QuoteField::CashSelling => "cashSelling",
            QuoteField::TransactionalBuying => "transactionalBuying",
            QuoteField::TransactionalSelling => "transactionalSelling",
        }
    }

}

impl fmt::Display for QuoteField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A quote as reported by a source adapter: any subset of the four fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawQuote {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cash_buying: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cash_selling: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transactional_buying: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transactional_selling: Option<Decimal>,
}

impl RawQuote {
    /// Quote with only the cash fields set.
    pub fn cash(buying: Decimal, selling: Decimal) -> Self {
        Self {
            cash_buying: Some(buying),
            cash_selling: Some(selling),
            ..Default::default()
        }
    }

    /// Quote with only the transactional fields set.
    pub fn transactional(buying: Decimal, selling: Decimal) -> Self {
        Self {
            transactional_buying: Some(buying),
            transactional_selling: Some(selling),
            ..Default::default()
        }
    }

    /// Builder-style setter for a single field.
    pub fn with(mut self, field: QuoteField, value: Decimal) -> Self {
        self.set(field, Some(value));
        self
    }

    /// Get the value of a field.
    pub fn get(&self, field: QuoteField) -> Option<Decimal> {
        match field {
            QuoteField::CashBuying => self.cash_buying,
            QuoteField::CashSelling => self.cash_selling,
            QuoteField::TransactionalBuying => self.transactional_buying,
            QuoteField::TransactionalSelling => self.transactional_selling,
        }
    }

    /// Set or clear a field.
    pub fn set(&mut self, field: QuoteField, value: Option<Decimal>) {
        let slot = match field {
            QuoteField::CashBuying => &mut self.cash_buying,
            QuoteField::CashSelling => &mut self.cash_selling,
            QuoteField::TransactionalBuying => &mut self.transactional_buying,
            QuoteField::TransactionalSelling => &mut self.transactional_selling,
        };
        *slot = value;
    }

    /// Present fields and their values, in document order.
    pub fn fields(&self) -> impl Iterator<Item = (QuoteField, Decimal)> + '_ {
        QuoteField::ALL
            .into_iter()
            .filter_map(|field| self.get(field).map(|value| (field, value)))
    }

    /// Check if no field is present.
    pub fn is_empty(&self) -> bool {
        self.fields().next().is_none()
    }

    /// Mean of the present buying fields.
    pub fn buying_average(&self) -> Option<Decimal> {
        mean([self.cash_buying, self.transactional_buying])
    }

    /// Mean of the present selling fields.
    pub fn selling_average(&self) -> Option<Decimal> {
        mean([self.cash_selling, self.transactional_selling])
    }
}

fn mean<const N: usize>(values: [Option<Decimal>; N]) -> Option<Decimal> {
    let present: Vec<Decimal> = values.into_iter().flatten().collect();
    mean_of(&present)
}

/// Arithmetic mean of `values`, or `None` if there are none.
///
/// Never panics: when the plain sum would overflow, the terms are divided
/// by the count before being added.
pub fn mean_of(values: &[Decimal]) -> Option<Decimal> {
    if values.is_empty() {
        return None;
    }
    let count = Decimal::from(values.len());

    let mean = match values
        .iter()
        .try_fold(Decimal::ZERO, |acc, value| acc.checked_add(*value))
    {
        Some(sum) => sum / count,
        None => values
            .iter()
            .fold(Decimal::ZERO, |acc, value| acc.saturating_add(*value / count)),
    };
    Some(mean)
}

/// Reconciled rates of one currency at one institution.
///
/// `last_changed_at` moves only when a persisted value actually changes.
/// It is `None` for entries written before change tracking existed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrencyRates {
    #[serde(flatten)]
    pub quote: RawQuote,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_changed_at: Option<Timestamp>,
}

impl CurrencyRates {
    /// Create rates that changed at the given time.
    pub fn new(quote: RawQuote, changed_at: Timestamp) -> Self {
        Self {
            quote,
            last_changed_at: Some(changed_at),
        }
    }

    /// Get the value of a field.
    pub fn get(&self, field: QuoteField) -> Option<Decimal> {
        self.quote.get(field)
    }
}
