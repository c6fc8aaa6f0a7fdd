//! Source adapter trait and institution descriptors.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use ratewatch_common::{CurrencyCode, InstitutionProfile, InstitutionSlug, RawQuote};
use tracing::{debug, warn};

use crate::error::{FxError, FxResult};

/// Quotes reported by one institution, keyed by currency.
pub type QuoteMap = BTreeMap<CurrencyCode, RawQuote>;

/// Trait for institution data sources.
///
/// Adapters hold no durable state. Expected failures (site unreachable,
/// markup changed) should be reported as `Ok(None)`; an `Err` is treated the
/// same way by the caller.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Get the adapter name.
    fn name(&self) -> &str;

    /// Fetch the current quotes of an institution.
    async fn refresh(&self, institution: &InstitutionSlug) -> FxResult<Option<QuoteMap>>;
}

/// An institution as supplied by the caller: identity plus its data source.
#[derive(Clone)]
pub struct InstitutionDescriptor {
    /// Identity written into the snapshot.
    pub profile: InstitutionProfile,
    /// Data source.
    pub adapter: Arc<dyn SourceAdapter>,
}

impl InstitutionDescriptor {
    /// Create a new descriptor.
    pub fn new(profile: InstitutionProfile, adapter: Arc<dyn SourceAdapter>) -> Self {
        Self { profile, adapter }
    }

    /// Get the institution slug.
    pub fn slug(&self) -> &InstitutionSlug {
        &self.profile.slug
    }

    /// Invoke the adapter on a separate task.
    ///
    /// Errors and panics both come back as `Err`, so a misbehaving adapter
    /// can never take the caller down with it.
    pub async fn fetch(&self) -> FxResult<Option<QuoteMap>> {
        let adapter = self.adapter.clone();
        let slug = self.slug().clone();

        let handle = tokio::spawn(async move { adapter.refresh(&slug).await });

        match handle.await {
            Ok(Ok(Some(quotes))) => {
                let quotes = normalise(quotes);
                debug!(
                    institution = %self.slug(),
                    adapter = self.adapter.name(),
                    currencies = quotes.len(),
                    "Adapter returned quotes"
                );
                Ok(Some(quotes))
            }
            Ok(result) => result,
            Err(e) => {
                warn!(
                    institution = %self.slug(),
                    adapter = self.adapter.name(),
                    error = %e,
                    "Adapter task aborted"
                );
                Err(FxError::AdapterPanicked {
                    adapter: self.adapter.name().to_string(),
                    institution: self.slug().clone(),
                })
            }
        }
    }
}

impl fmt::Debug for InstitutionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstitutionDescriptor")
            .field("profile", &self.profile)
            .field("adapter", &self.adapter.name())
            .finish()
    }
}

/// Drop malformed currency codes and quotes with no fields.
fn normalise(quotes: QuoteMap) -> QuoteMap {
    quotes
        .into_iter()
        .filter(|(code, quote)| {
            if !code.is_valid() {
                warn!(currency = %code, "Dropping quote with malformed currency code");
                return false;
            }
            !quote.is_empty()
        })
        .collect()
}

/// Scripted adapter for tests.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockSourceAdapter {
    name: String,
    responses: dashmap::DashMap<InstitutionSlug, MockResponse>,
    calls: dashmap::DashMap<InstitutionSlug, usize>,
}

/// What a [`MockSourceAdapter`] answers for one institution.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Return these quotes.
    Quotes(QuoteMap),
    /// Return `Ok(None)`.
    NoData,
    /// Return an adapter error.
    Fail(String),
    /// Panic inside the adapter.
    Panic,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockSourceAdapter {
    /// Create a new mock adapter.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            responses: dashmap::DashMap::new(),
            calls: dashmap::DashMap::new(),
        }
    }

    /// Set the quotes returned for an institution.
    pub fn set_quotes(&self, institution: impl Into<InstitutionSlug>, quotes: QuoteMap) {
        self.responses
            .insert(institution.into(), MockResponse::Quotes(quotes));
    }

    /// Set an arbitrary response for an institution.
    pub fn set_response(&self, institution: impl Into<InstitutionSlug>, response: MockResponse) {
        self.responses.insert(institution.into(), response);
    }

    /// Number of refreshes requested for an institution.
    pub fn calls(&self, institution: &InstitutionSlug) -> usize {
        self.calls.get(institution).map(|c| *c).unwrap_or(0)
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl SourceAdapter for MockSourceAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn refresh(&self, institution: &InstitutionSlug) -> FxResult<Option<QuoteMap>> {
        *self.calls.entry(institution.clone()).or_insert(0) += 1;

        let response = self
            .responses
            .get(institution)
            .map(|r| r.clone())
            .unwrap_or(MockResponse::NoData);

        match response {
            MockResponse::Quotes(quotes) => Ok(Some(quotes)),
            MockResponse::NoData => Ok(None),
            MockResponse::Fail(reason) => Err(FxError::AdapterFailed {
                adapter: self.name.clone(),
                institution: institution.clone(),
                reason,
            }),
            MockResponse::Panic => panic!("scripted adapter panic for {institution}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratewatch_common::QuoteField;
    use rust_decimal_macros::dec;

    fn descriptor(adapter: Arc<MockSourceAdapter>) -> InstitutionDescriptor {
        InstitutionDescriptor::new(
            InstitutionProfile::new("cbe", "Commercial Bank of Ethiopia", "cbe", "CBE"),
            adapter,
        )
    }

    #[tokio::test]
    async fn test_mock_adapter_quotes() {
        let adapter = Arc::new(MockSourceAdapter::new("mock"));
        let mut quotes = QuoteMap::new();
        quotes.insert(CurrencyCode::usd(), RawQuote::cash(dec!(130.5), dec!(133.1)));
        adapter.set_quotes("cbe", quotes);

        let result = descriptor(adapter.clone()).fetch().await.unwrap().unwrap();

        assert_eq!(
            result[&CurrencyCode::usd()].get(QuoteField::CashBuying),
            Some(dec!(130.5))
        );
        assert_eq!(adapter.calls(&"cbe".into()), 1);
    }

    #[tokio::test]
    async fn test_fetch_drops_malformed_entries() {
        let adapter = Arc::new(MockSourceAdapter::new("mock"));
        let mut quotes = QuoteMap::new();
        quotes.insert(CurrencyCode::new("U$"), RawQuote::cash(dec!(1), dec!(2)));
        quotes.insert(CurrencyCode::eur(), RawQuote::default());
        quotes.insert(CurrencyCode::gbp(), RawQuote::cash(dec!(170), dec!(174)));
        adapter.set_quotes("cbe", quotes);

        let result = descriptor(adapter).fetch().await.unwrap().unwrap();

        assert_eq!(result.len(), 1);
        assert!(result.contains_key(&CurrencyCode::gbp()));
    }

    #[tokio::test]
    async fn test_fetch_reports_no_data() {
        let adapter = Arc::new(MockSourceAdapter::new("mock"));
        let result = descriptor(adapter).fetch().await;
        tokio_test::assert_ok!(&result);
        assert!(result.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fetch_contains_adapter_panic() {
        let adapter = Arc::new(MockSourceAdapter::new("mock"));
        adapter.set_response("cbe", MockResponse::Panic);

        let result = descriptor(adapter).fetch().await;

        assert!(matches!(result, Err(FxError::AdapterPanicked { .. })));
    }

    #[tokio::test]
    async fn test_fetch_passes_adapter_error() {
        let adapter = Arc::new(MockSourceAdapter::new("mock"));
        adapter.set_response("cbe", MockResponse::Fail("markup changed".into()));

        let result = descriptor(adapter).fetch().await;

        tokio_test::assert_err!(&result);
        assert!(matches!(result, Err(FxError::AdapterFailed { .. })));
    }
}
