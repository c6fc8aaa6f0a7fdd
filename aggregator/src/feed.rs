//! Feed-directory source adapter.
//!
//! Scrapers run out of process and drop one JSON file per institution into
//! a shared directory:
//!
//! ```json
//! { "USD": { "cashBuying": 130.5, "cashSelling": 133.11 } }
//! ```

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use ratewatch_common::{CurrencyCode, InstitutionSlug, RawQuote};
use ratewatch_fx::{FxError, FxResult, QuoteMap, SourceAdapter};
use tracing::debug;

/// Reads `<dir>/<slug>.json` on every refresh.
#[derive(Debug, Clone)]
pub struct FeedDirectoryAdapter {
    dir: PathBuf,
}

impl FeedDirectoryAdapter {
    /// Create an adapter reading from `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of an institution's feed file.
    pub fn feed_path(&self, institution: &InstitutionSlug) -> PathBuf {
        self.dir.join(format!("{}.json", institution.as_str()))
    }
}

#[async_trait]
impl SourceAdapter for FeedDirectoryAdapter {
    fn name(&self) -> &str {
        "feed-dir"
    }

    async fn refresh(&self, institution: &InstitutionSlug) -> FxResult<Option<QuoteMap>> {
        let path = self.feed_path(institution);

        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(institution = %institution, path = %path.display(), "No feed file");
                return Ok(None);
            }
            Err(e) => {
                return Err(FxError::AdapterFailed {
                    adapter: self.name().to_string(),
                    institution: institution.clone(),
                    reason: e.to_string(),
                })
            }
        };

        if raw.trim().is_empty() {
            return Ok(None);
        }

        let malformed = |reason: String| FxError::MalformedFeed {
            source_name: path.display().to_string(),
            reason,
        };

        let entries: BTreeMap<String, RawQuote> =
            serde_json::from_str(&raw).map_err(|e| malformed(e.to_string()))?;

        // Keys are matched case-insensitively; "usd" and "USD" together are
        // ambiguous, so the whole file is refused.
        let mut quotes = QuoteMap::new();
        for (key, quote) in entries {
            let currency = CurrencyCode::new(&key);
            if quotes.contains_key(&currency) {
                return Err(malformed(format!("currency {currency} listed more than once")));
            }
            quotes.insert(currency, quote);
        }

        Ok(Some(quotes))
    }
}
