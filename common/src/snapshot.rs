//! The reconciled snapshot document and its institution records.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{CurrencyCode, CurrencyRates, InstitutionSlug, Timestamp};

/// Well-known identifier of the single live snapshot document.
pub const SNAPSHOT_DOCUMENT_ID: &str = "current_bank_rates";

/// Identity of a rate-reporting institution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstitutionProfile {
    /// Stable identifier.
    pub slug: InstitutionSlug,
    /// Display name.
    pub name: String,
    /// Short name used in compact listings.
    #[serde(alias = "short")]
    pub short_name: String,
    /// Ticker-like symbol.
    #[serde(default)]
    pub symbol: String,
}

impl InstitutionProfile {
    /// Create a new institution profile.
    pub fn new(
        slug: impl Into<String>,
        name: impl Into<String>,
        short_name: impl Into<String>,
        symbol: impl Into<String>,
    ) -> Self {
        Self {
            slug: InstitutionSlug::new(slug),
            name: name.into(),
            short_name: short_name.into(),
            symbol: symbol.into(),
        }
    }
}

/// Everything known about one institution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstitutionRecord {
    #[serde(flatten)]
    pub profile: InstitutionProfile,
    /// Last successful refresh, whether or not any value changed.
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
    /// Reconciled rates by currency.
    #[serde(default)]
    pub rates: BTreeMap<CurrencyCode, CurrencyRates>,
}

impl InstitutionRecord {
    /// Create an empty record that has never been refreshed.
    pub fn new(profile: InstitutionProfile) -> Self {
        Self {
            profile,
            updated_at: None,
            rates: BTreeMap::new(),
        }
    }

    /// Get the institution slug.
    pub fn slug(&self) -> &InstitutionSlug {
        &self.profile.slug
    }

    /// Get the rates for a currency.
    pub fn rates_for(&self, currency: &CurrencyCode) -> Option<&CurrencyRates> {
        self.rates.get(currency)
    }
}

/// The complete reconciled dataset. This is the unit of persistence.
///
/// Snapshots are values: a merge produces a new snapshot through
/// [`Snapshot::with_institution`] and never edits the one it was read from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Time of the last merge of any institution.
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
    /// Institution records by slug.
    #[serde(rename = "banks", default)]
    pub institutions: BTreeMap<InstitutionSlug, InstitutionRecord>,
}

impl Snapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if no institution has been recorded.
    pub fn is_empty(&self) -> bool {
        self.institutions.is_empty()
    }

    /// Get an institution record.
    pub fn institution(&self, slug: &InstitutionSlug) -> Option<&InstitutionRecord> {
        self.institutions.get(slug)
    }

    /// Last successful refresh of an institution, if any.
    pub fn updated_at_of(&self, slug: &InstitutionSlug) -> Option<Timestamp> {
        self.institution(slug).and_then(|record| record.updated_at)
    }

    /// Rates of every institution that reports the given currency.
    pub fn rates_for<'a>(
        &'a self,
        currency: &'a CurrencyCode,
    ) -> impl Iterator<Item = (&'a InstitutionSlug, &'a CurrencyRates)> + 'a {
        self.institutions
            .iter()
            .filter_map(move |(slug, record)| record.rates_for(currency).map(|rates| (slug, rates)))
    }

    /// Every currency reported by at least one institution.
    pub fn currencies(&self) -> BTreeSet<CurrencyCode> {
        self.institutions
            .values()
            .flat_map(|record| record.rates.keys().cloned())
            .collect()
    }

    /// Copy of this snapshot with one institution record replaced.
    ///
    /// Other records pass through unchanged.
    pub fn with_institution(&self, record: InstitutionRecord, updated_at: Timestamp) -> Snapshot {
        let mut next = self.clone();
        next.institutions.insert(record.slug().clone(), record);
        next.updated_at = Some(updated_at);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RawQuote;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn cbe() -> InstitutionProfile {
        InstitutionProfile::new("cbe", "Commercial Bank of Ethiopia", "cbe", "CBE")
    }

    #[test]
    fn test_with_institution_is_copy_on_write() {
        let t0 = Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 7, 1, 9, 20, 0).unwrap();

        let mut record = InstitutionRecord::new(cbe());
        record.updated_at = Some(t0);
        let original = Snapshot::new().with_institution(record.clone(), t0);

        let mut changed = record.clone();
        changed.updated_at = Some(t1);
        let next = original.with_institution(changed, t1);

        assert_eq!(original.updated_at_of(&"cbe".into()), Some(t0));
        assert_eq!(next.updated_at_of(&"cbe".into()), Some(t1));
        assert_eq!(next.updated_at, Some(t1));
    }

    #[test]
    fn test_currencies_and_rates_for() {
        let now = Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap();
        let mut record = InstitutionRecord::new(cbe());
        record.rates.insert(
            CurrencyCode::usd(),
            CurrencyRates::new(RawQuote::cash(dec!(130), dec!(133)), now),
        );
        let snapshot = Snapshot::new().with_institution(record, now);

        assert_eq!(snapshot.currencies().len(), 1);
        assert_eq!(snapshot.rates_for(&CurrencyCode::usd()).count(), 1);
        assert_eq!(snapshot.rates_for(&CurrencyCode::eur()).count(), 0);
    }

    #[test]
    fn test_reads_collector_document() {
        let json = r#"{
            "updatedAt": "2024-07-01T09:00:00.000Z",
            "banks": {
                "nbe": {
                    "updatedAt": "2024-07-01T09:00:00.000Z",
                    "slug": "nbe",
                    "name": "National Bank of Ethiopia",
                    "short": "nbe",
                    "rates": {
                        "USD": { "transactionalBuying": 57.5, "transactionalSelling": 58.65 }
                    }
                }
            }
        }"#;

        let snapshot: Snapshot = serde_json::from_str(json).unwrap();
        let record = snapshot.institution(&"nbe".into()).unwrap();

        assert_eq!(record.profile.short_name, "nbe");
        assert_eq!(record.profile.symbol, "");
        let usd = record.rates_for(&CurrencyCode::usd()).unwrap();
        assert_eq!(usd.quote.transactional_buying, Some(dec!(57.5)));
        assert_eq!(usd.last_changed_at, None);
    }

    #[test]
    fn test_document_round_trip() {
        let t0 = Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 7, 1, 9, 20, 0).unwrap();

        let mut cbe_record = InstitutionRecord::new(cbe());
        cbe_record.updated_at = Some(t1);
        cbe_record.rates.insert(
            CurrencyCode::usd(),
            CurrencyRates::new(RawQuote::cash(dec!(130.50), dec!(133.11)), t0),
        );
        cbe_record.rates.insert(
            CurrencyCode::eur(),
            CurrencyRates::new(RawQuote::transactional(dec!(145.2), dec!(148.1)), t1),
        );
        let mut awash = InstitutionRecord::new(InstitutionProfile::new("awash", "Awash Bank", "awash", "AWB"));
        awash.updated_at = Some(t0);
        awash.rates.insert(
            CurrencyCode::usd(),
            CurrencyRates {
                quote: RawQuote::cash(dec!(131), dec!(134)),
                last_changed_at: None,
            },
        );
        let snapshot = Snapshot::new()
            .with_institution(awash, t0)
            .with_institution(cbe_record, t1);

        let json = serde_json::to_string(&snapshot).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let usd = &value["banks"]["cbe"]["rates"]["USD"];
        assert_eq!(usd["cashBuying"], "130.50");
        assert_eq!(usd["lastChangedAt"], "2024-07-01T09:00:00Z");
        assert!(usd.get("transactionalBuying").is_none());
        assert_eq!(value["banks"]["cbe"]["shortName"], "cbe");
        assert!(value["banks"]["awash"]["rates"]["USD"].get("lastChangedAt").is_none());

        let back: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
        assert_eq!(back.updated_at, Some(t1));
    }

    #[test]
    fn test_document_uses_banks_key() {
        let snapshot = Snapshot::new();
        let json = serde_json::to_value(&snapshot).unwrap();
        assert!(json.get("banks").is_some());
    }
}
