//!
//! The analytical store: an embedded single-file SQLite database holding
//! telemetry, registered services, PSKs, certificates and IP allocations.
//!
//! The colony process owns exactly one [ColonyDb] handle. Transactional
//! writes are serialized by the single writer connection; reads run
//! concurrently. All store failures surface as the `StorageUnavailable`
//! error kind so pollers can drop a batch and resume the next cycle.
//!

pub mod agents;
pub mod certificates;
pub mod ip_allocations;
mod migrations;
pub mod psks;
pub mod retention;
pub mod services;
pub mod sql_guard;
pub mod telemetry;

use crate::error::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    SqlitePool,
};
use std::path::Path;

/// Handle to the colony's analytical store.
#[derive(Debug, Clone)]
pub struct ColonyDb {
    pool: SqlitePool,
}

impl ColonyDb {
    /// Open (or create) the store at `path` and run migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        migrations::run(&pool).await?;

        Ok(Self { pool })
    }

    /// An ephemeral in-memory store for tests.
    ///
    /// Uses a single connection: every in-memory SQLite connection is its
    /// own database.
    pub async fn test() -> Self {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .expect("in-memory sqlite should open");

        migrations::run(&pool)
            .await
            .expect("migrations should apply to an empty database");

        Self { pool }
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_creates_file_and_tables() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("colony.db");

        let db = ColonyDb::open(&path).await.unwrap();
        assert!(path.exists());

        // Re-running migrations on reopen is a no-op.
        let db2 = ColonyDb::open(&path).await.unwrap();
        drop(db);
        drop(db2);
    }

    #[tokio::test]
    async fn test_store_is_usable() {
        let db = ColonyDb::test().await;
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM certificates")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }
}
