//! RateWatch Snapshot Store
//!
//! Persistence for the single reconciled snapshot document, with
//! optimistic concurrency: every save names the revision it was based on.

pub mod store;
pub mod memory;
pub mod postgres;
pub mod error;

pub use store::{Revision, SnapshotStore, StoredSnapshot};
pub use memory::InMemorySnapshotStore;
pub use postgres::PgSnapshotStore;
pub use error::{StoreError, StoreResult};
