//! Snapshot store trait and revision token.

use std::fmt;

use async_trait::async_trait;
use ratewatch_common::Snapshot;
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;

/// Optimistic-concurrency token of the stored document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Revision(i64);

impl Revision {
    /// Revision of the first write.
    pub fn initial() -> Self {
        Self(1)
    }

    /// Create from a raw value.
    pub fn from_raw(value: i64) -> Self {
        Self(value)
    }

    /// Revision that follows this one.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Get the raw value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A snapshot together with the revision it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSnapshot {
    pub revision: Revision,
    pub snapshot: Snapshot,
}

/// Storage for the single reconciled snapshot document.
///
/// `save` must fail with [`StoreError::Conflict`](crate::StoreError::Conflict)
/// whenever `expected` is not the current revision, including when a
/// document exists and `expected` is `None`. A write based on a stale read
/// never replaces newer data.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Store name for logs.
    fn name(&self) -> &str;

    /// Read the current document, if one has been written.
    async fn load(&self) -> StoreResult<Option<StoredSnapshot>>;

    /// Write a new document conditional on the revision that was read.
    async fn save(&self, snapshot: &Snapshot, expected: Option<Revision>) -> StoreResult<Revision>;
}
