//! Outlier filtering of incoming quote fields.

use ratewatch_common::{CurrencyCode, QuoteField, RawQuote};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::baseline::{Baseline, BaselineSide};
use crate::error::{FxError, FxResult};

/// Baseline a field is measured against.
///
/// Cash selling is grouped with the buying baseline and both transactional
/// fields with the selling baseline. This pairing is kept exactly as the
/// published dataset has always been screened; see the tests pinning it.
pub fn yardstick(field: QuoteField) -> BaselineSide {
    match field {
        QuoteField::CashBuying | QuoteField::CashSelling => BaselineSide::Buying,
        QuoteField::TransactionalBuying | QuoteField::TransactionalSelling => BaselineSide::Selling,
    }
}

/// Decision for a single field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screening {
    /// Field not reported.
    Absent,
    /// Field reported as zero or negative, or too large to be banded;
    /// treated as not reported.
    Malformed(Decimal),
    /// Value kept.
    Accepted(Decimal),
    /// Value outside the band around the baseline.
    Rejected { value: Decimal, baseline: Decimal },
}

impl Screening {
    /// Accepted value, if any.
    pub fn accepted(&self) -> Option<Decimal> {
        match self {
            Screening::Accepted(value) => Some(*value),
            _ => None,
        }
    }
}

/// A field dropped as an outlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedField {
    pub field: QuoteField,
    pub value: Decimal,
    pub baseline: Decimal,
}

/// Result of screening a whole quote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScreenedQuote {
    /// Fields that survived.
    pub accepted: RawQuote,
    /// Fields dropped as outliers.
    pub rejected: Vec<RejectedField>,
    /// Fields dropped because they were not positive.
    pub malformed: Vec<QuoteField>,
}

impl ScreenedQuote {
    /// Check if nothing survived.
    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }
}

/// Outlier policy: a symmetric relative band around the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlierPolicy {
    band: Decimal,
}

impl Default for OutlierPolicy {
    fn default() -> Self {
        Self {
            band: Decimal::new(2, 1), // ±20%
        }
    }
}

impl OutlierPolicy {
    /// Create a policy with the given relative band, e.g. `0.2` for ±20%.
    pub fn new(band: Decimal) -> FxResult<Self> {
        if band <= Decimal::ZERO || band >= Decimal::ONE {
            return Err(FxError::InvalidBand(format!(
                "band must be within (0, 1), got {band}"
            )));
        }
        Ok(Self { band })
    }

    /// The relative band.
    pub fn band(&self) -> Decimal {
        self.band
    }

    /// Screen one field value against a baseline.
    ///
    /// A zero baseline means no yardstick exists yet and every positive value
    /// is accepted. Values exactly on the band edges are accepted.
    ///
    /// A value whose upper band edge does not fit in a `Decimal` is malformed,
    /// so nothing accepted here can overflow a later baseline's band.
    pub fn screen(&self, value: Option<Decimal>, baseline: Decimal) -> Screening {
        let Some(value) = value else {
            return Screening::Absent;
        };

        if value <= Decimal::ZERO || value.checked_mul(Decimal::ONE + self.band).is_none() {
            return Screening::Malformed(value);
        }

        if baseline.is_zero() {
            return Screening::Accepted(value);
        }

        // Saturates for baselines persisted before the headroom check existed.
        let upper = baseline.saturating_mul(Decimal::ONE + self.band);
        let lower = baseline.saturating_mul(Decimal::ONE - self.band);

        if value > upper || value < lower {
            Screening::Rejected { value, baseline }
        } else {
            Screening::Accepted(value)
        }
    }

    /// Screen every field of a quote.
    pub fn screen_quote(
        &self,
        currency: &CurrencyCode,
        quote: &RawQuote,
        baseline: &Baseline,
    ) -> ScreenedQuote {
        let mut screened = ScreenedQuote::default();

        for field in QuoteField::ALL {
            let against = baseline.side(yardstick(field));

            match self.screen(quote.get(field), against) {
                Screening::Absent => {}
                Screening::Accepted(value) => {
                    debug!(currency = %currency, field = %field, value = %value, "Field accepted");
                    screened.accepted.set(field, Some(value));
                }
                Screening::Malformed(value) => {
                    debug!(currency = %currency, field = %field, value = %value, "Non-positive field ignored");
                    screened.malformed.push(field);
                }
                Screening::Rejected { value, baseline } => {
                    warn!(
                        currency = %currency,
                        field = %field,
                        value = %value,
                        baseline = %baseline,
                        "Outlier rejected"
                    );
                    screened.rejected.push(RejectedField {
                        field,
                        value,
                        baseline,
                    });
                }
            }
        }

        screened
    }
}
