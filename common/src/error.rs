//! Error types for RateWatch.

use crate::InstitutionSlug;
use thiserror::Error;

/// Main error type for RateWatch operations.
#[derive(Error, Debug)]
pub enum RateWatchError {
    /// Source adapter failed.
    #[error("Adapter for {institution} failed: {reason}")]
    AdapterFailed {
        institution: InstitutionSlug,
        reason: String,
    },

    /// The snapshot changed since it was read.
    #[error("Snapshot conflict: expected revision {expected}, found {actual}")]
    SnapshotConflict { expected: String, actual: String },

    /// The snapshot store cannot be reached.
    #[error("Snapshot store unavailable: {0}")]
    StoreUnavailable(String),

    /// The stored snapshot cannot be decoded.
    #[error("Corrupt snapshot document: {0}")]
    CorruptSnapshot(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl RateWatchError {
    /// Check if this error ends the current tick.
    ///
    /// Everything else is confined to a single institution's refresh.
    pub fn is_tick_fatal(&self) -> bool {
        matches!(
            self,
            RateWatchError::StoreUnavailable(_)
                | RateWatchError::CorruptSnapshot(_)
                | RateWatchError::ConfigurationError(_)
        )
    }

    /// Get a stable error code for logs and reports.
    pub fn error_code(&self) -> &'static str {
        match self {
            RateWatchError::AdapterFailed { .. } => "ADAPTER_FAILED",
            RateWatchError::SnapshotConflict { .. } => "SNAPSHOT_CONFLICT",
            RateWatchError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            RateWatchError::CorruptSnapshot(_) => "CORRUPT_SNAPSHOT",
            RateWatchError::ConfigurationError(_) => "CONFIGURATION_ERROR",
            RateWatchError::InternalError(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result type alias for RateWatch operations.
pub type Result<T> = std::result::Result<T, RateWatchError>;
