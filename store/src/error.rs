//! Snapshot store error types.

use ratewatch_common::RateWatchError;
use thiserror::Error;

use crate::store::Revision;

/// Errors returned by snapshot stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The document moved on since it was read.
    #[error("Revision conflict: expected {expected:?}, found {actual:?}")]
    Conflict {
        expected: Option<Revision>,
        actual: Option<Revision>,
    },

    /// The backend cannot be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The stored document cannot be decoded or encoded.
    #[error("Corrupt document: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Check if this is an optimistic-concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

impl From<StoreError> for RateWatchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { expected, actual } => RateWatchError::SnapshotConflict {
                expected: describe(expected),
                actual: describe(actual),
            },
            StoreError::Unavailable(reason) => RateWatchError::StoreUnavailable(reason),
            StoreError::Corrupt(reason) => RateWatchError::CorruptSnapshot(reason),
        }
    }
}

fn describe(revision: Option<Revision>) -> String {
    revision
        .map(|r| r.to_string())
        .unwrap_or_else(|| "none".to_string())
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
