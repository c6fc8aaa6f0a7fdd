//! In-process snapshot store.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use ratewatch_common::Snapshot;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::store::{Revision, SnapshotStore, StoredSnapshot};

/// Revisioned in-memory store with fault injection.
///
/// Used by tests and the simulator, and by the service when no database is
/// configured. Nothing survives a restart.
pub struct InMemorySnapshotStore {
    current: Mutex<Option<StoredSnapshot>>,
    available: AtomicBool,
    corrupt: AtomicBool,
    forced_conflicts: AtomicUsize,
    saves: AtomicU64,
}

impl InMemorySnapshotStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            current: Mutex::new(None),
            available: AtomicBool::new(true),
            corrupt: AtomicBool::new(false),
            forced_conflicts: AtomicUsize::new(0),
            saves: AtomicU64::new(0),
        }
    }

    /// Create a store already holding a snapshot.
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        let store = Self::new();
        *store.current.lock() = Some(StoredSnapshot {
            revision: Revision::initial(),
            snapshot,
        });
        store
    }

    /// Current snapshot, bypassing availability checks.
    pub fn snapshot(&self) -> Option<Snapshot> {
        self.current.lock().as_ref().map(|s| s.snapshot.clone())
    }

    /// Current revision.
    pub fn revision(&self) -> Option<Revision> {
        self.current.lock().as_ref().map(|s| s.revision)
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }

    /// Make the next `count` saves fail with a conflict.
    pub fn fail_next_saves(&self, count: usize) {
        self.forced_conflicts.store(count, Ordering::SeqCst);
    }

    /// Toggle reachability.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make the stored document undecodable, as a foreign writer could.
    ///
    /// Loads fail with [`StoreError::Corrupt`] and saves are refused until
    /// cleared; the held snapshot is left as it was.
    pub fn set_corrupt(&self, corrupt: bool) {
        self.corrupt.store(corrupt, Ordering::SeqCst);
    }

    /// Write unconditionally, as a concurrent writer would.
    pub fn replace(&self, snapshot: Snapshot) -> Revision {
        let mut current = self.current.lock();
        let revision = current
            .as_ref()
            .map(|s| s.revision.next())
            .unwrap_or_else(Revision::initial);
        *current = Some(StoredSnapshot { revision, snapshot });
        revision
    }

    fn ensure_available(&self) -> StoreResult<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store switched off".to_string()));
        }
        if self.corrupt.load(Ordering::SeqCst) {
            return Err(StoreError::Corrupt("stored document marked corrupt".to_string()));
        }
        Ok(())
    }

    fn take_forced_conflict(&self) -> bool {
        self.forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for InMemorySnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load(&self) -> StoreResult<Option<StoredSnapshot>> {
        self.ensure_available()?;
        Ok(self.current.lock().clone())
    }

    async fn save(&self, snapshot: &Snapshot, expected: Option<Revision>) -> StoreResult<Revision> {
        self.ensure_available()?;

        let mut current = self.current.lock();
        let actual = current.as_ref().map(|s| s.revision);

        if self.take_forced_conflict() {
            warn!(expected = ?expected, "Injected conflict");
            return Err(StoreError::Conflict { expected, actual });
        }

        if actual != expected {
            return Err(StoreError::Conflict { expected, actual });
        }

        let revision = actual.map(|r| r.next()).unwrap_or_else(Revision::initial);
        *current = Some(StoredSnapshot {
            revision,
            snapshot: snapshot.clone(),
        });
        self.saves.fetch_add(1, Ordering::Relaxed);

        debug!(revision = %revision, "Snapshot saved");
        Ok(revision)
    }
}
