//! PostgreSQL-backed snapshot store.
//!
//! The document is kept as JSON text in a single row of `rate_snapshots`,
//! next to an integer revision. Every write is conditional on the revision
//! that was read, so a writer holding a stale copy gets a conflict instead
//! of overwriting newer data.

use std::time::Duration;

use async_trait::async_trait;
use ratewatch_common::Snapshot;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, instrument};

use crate::error::{StoreError, StoreResult};
use crate::store::{Revision, SnapshotStore, StoredSnapshot};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS rate_snapshots (
    id          TEXT PRIMARY KEY,
    revision    BIGINT NOT NULL,
    document    TEXT NOT NULL,
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

/// Snapshot store on PostgreSQL.
pub struct PgSnapshotStore {
    pool: PgPool,
    document_id: String,
}

impl PgSnapshotStore {
    /// Connect to the database.
    pub async fn connect(database_url: &str, document_id: impl Into<String>) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(unavailable)?;

        Ok(Self::from_pool(pool, document_id))
    }

    /// Use an existing pool.
    pub fn from_pool(pool: PgPool, document_id: impl Into<String>) -> Self {
        Self {
            pool,
            document_id: document_id.into(),
        }
    }

    /// Create the snapshot table if it does not exist.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::query(CREATE_TABLE)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;

        info!(document_id = %self.document_id, "Snapshot table ready");
        Ok(())
    }

    async fn current_revision(&self) -> StoreResult<Option<Revision>> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT revision FROM rate_snapshots WHERE id = $1")
            .bind(&self.document_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;

        Ok(row.map(|(revision,)| Revision::from_raw(revision)))
    }
}

#[async_trait]
impl SnapshotStore for PgSnapshotStore {
    fn name(&self) -> &str {
        "postgres"
    }

    #[instrument(skip(self), fields(document_id = %self.document_id))]
    async fn load(&self) -> StoreResult<Option<StoredSnapshot>> {
        let row: Option<(i64, String)> =
            sqlx::query_as("SELECT revision, document FROM rate_snapshots WHERE id = $1")
                .bind(&self.document_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(unavailable)?;

        let Some((revision, document)) = row else {
            return Ok(None);
        };

        let snapshot: Snapshot = serde_json::from_str(&document)?;
        debug!(revision, "Snapshot loaded");

        Ok(Some(StoredSnapshot {
            revision: Revision::from_raw(revision),
            snapshot,
        }))
    }

    #[instrument(skip(self, snapshot), fields(document_id = %self.document_id))]
    async fn save(&self, snapshot: &Snapshot, expected: Option<Revision>) -> StoreResult<Revision> {
        let document = serde_json::to_string(snapshot)?;

        let written: Option<(i64,)> = match expected {
            None => sqlx::query_as(
                "INSERT INTO rate_snapshots (id, revision, document) VALUES ($1, $2, $3) \
                 ON CONFLICT (id) DO NOTHING RETURNING revision",
            )
            .bind(&self.document_id)
            .bind(Revision::initial().as_i64())
            .bind(&document)
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?,
            Some(revision) => sqlx::query_as(
                "UPDATE rate_snapshots SET revision = revision + 1, document = $2, updated_at = now() \
                 WHERE id = $1 AND revision = $3 RETURNING revision",
            )
            .bind(&self.document_id)
            .bind(&document)
            .bind(revision.as_i64())
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?,
        };

        match written {
            Some((revision,)) => {
                debug!(revision, "Snapshot saved");
                Ok(Revision::from_raw(revision))
            }
            None => Err(StoreError::Conflict {
                expected,
                actual: self.current_revision().await?,
            }),
        }
    }
}

fn unavailable(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(err.to_string())
        }
        other => StoreError::Unavailable(other.to_string()),
    }
}
