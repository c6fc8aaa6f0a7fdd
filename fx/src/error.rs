//! Quote screening error types.

use ratewatch_common::{InstitutionSlug, RateWatchError};
use thiserror::Error;

/// Errors that can occur while obtaining or screening quotes.
#[derive(Debug, Error)]
pub enum FxError {
    /// Adapter could not produce quotes.
    #[error("Adapter {adapter} failed for {institution}: {reason}")]
    AdapterFailed {
        adapter: String,
        institution: InstitutionSlug,
        reason: String,
    },

    /// Adapter task panicked or was cancelled.
    #[error("Adapter {adapter} aborted for {institution}")]
    AdapterPanicked {
        adapter: String,
        institution: InstitutionSlug,
    },

    /// Adapter produced data that could not be decoded.
    #[error("Malformed feed from {source_name}: {reason}")]
    MalformedFeed { source_name: String, reason: String },

    /// Outlier band outside the open interval (0, 1).
    #[error("Invalid outlier band: {0}")]
    InvalidBand(String),
}

impl From<FxError> for RateWatchError {
    fn from(err: FxError) -> Self {
        match err {
            FxError::AdapterFailed {
                institution, reason, ..
            } => RateWatchError::AdapterFailed {
                institution,
                reason,
            },
            FxError::AdapterPanicked { institution, .. } => RateWatchError::AdapterFailed {
                institution,
                reason: "adapter aborted".to_string(),
            },
            FxError::MalformedFeed { source_name, reason } => {
                RateWatchError::InternalError(format!("{source_name}: {reason}"))
            }
            FxError::InvalidBand(band) => RateWatchError::ConfigurationError(band),
        }
    }
}

/// Result type for quote screening operations.
pub type FxResult<T> = Result<T, FxError>;
