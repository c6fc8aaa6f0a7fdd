//! Identifier types for RateWatch entities.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a scheduling tick.
/// Uses UUID v7 so tick identifiers sort by start time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TickId(Uuid);

impl TickId {
    /// Create a new tick ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TickId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TickId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Short uppercase currency identifier (e.g. `USD`).
///
/// This is the join key across institutions when baselines are computed, so
/// input is normalised: surrounding whitespace is trimmed and letters are
/// uppercased. `"usd "` and `"USD"` are the same code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct CurrencyCode(String);

impl CurrencyCode {
    /// Create a currency code, normalising case and whitespace.
    pub fn new(code: impl AsRef<str>) -> Self {
        Self(code.as_ref().trim().to_ascii_uppercase())
    }

    /// Create a currency code, rejecting malformed input.
    pub fn parse(code: &str) -> Option<Self> {
        let code = Self::new(code);
        code.is_valid().then_some(code)
    }

    /// Get the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Codes are 2-8 ASCII alphanumerics.
    pub fn is_valid(&self) -> bool {
        (2..=8).contains(&self.0.len()) && self.0.chars().all(|c| c.is_ascii_alphanumeric())
    }

    /// US Dollar.
    pub fn usd() -> Self {
        Self::new("USD")
    }

    /// Euro.
    pub fn eur() -> Self {
        Self::new("EUR")
    }

    /// British Pound.
    pub fn gbp() -> Self {
        Self::new("GBP")
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CurrencyCode {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CurrencyCode {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<CurrencyCode> for String {
    fn from(code: CurrencyCode) -> Self {
        code.0
    }
}

/// Stable identifier of a rate-reporting institution (e.g. `cbe`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstitutionSlug(String);

impl InstitutionSlug {
    /// Create a new institution slug.
    pub fn new(slug: impl Into<String>) -> Self {
        Self(slug.into())
    }

    /// Get the slug as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validate the slug format.
    pub fn is_valid(&self) -> bool {
        // Lowercase alphanumerics with '-' or '_' separators
        !self.0.is_empty()
            && self.0.len() <= 64
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    }
}

impl fmt::Display for InstitutionSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for InstitutionSlug {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
