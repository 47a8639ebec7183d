//! Embedded SQL storage.
//!
//! One SQLite file (WAL mode) holds the per-entity metadata, phase, and
//! history tables plus the shared idempotency and registry tables. All
//! operations run on the blocking thread pool via
//! `tokio::task::spawn_blocking`; every mutating operation is a single
//! `BEGIN IMMEDIATE` transaction, so a storage fault rolls back without
//! partial state and without an event being emitted.

pub mod idempotency;
pub mod registry;
pub mod schema;
pub mod task_store;
pub mod workflow_store;

pub use idempotency::{CachedResponse, IdemWrite, IdempotencyRow, IdempotencyStore};
pub use registry::RegistryStore;
pub use task_store::{TaskStore, TaskWrite};
pub use workflow_store::{WorkflowStore, WorkflowWrite};

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use rusqlite::Connection;
use tokio::task;

use crate::error::ApiError;

/// Handle to the embedded database file.
///
/// Connections are opened per operation on the blocking pool, matching
/// the short-transaction discipline of the broker: no connection is held
/// across network I/O.
#[derive(Debug, Clone)]
pub struct Database {
    db_path: PathBuf,
}

impl Database {
    /// Open (and migrate) the database at `path`.
    pub async fn open<P: Into<PathBuf>>(path: P) -> anyhow::Result<Self> {
        let db_path = path.into();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let db = Self { db_path };
        db.migrate_schema().await?;
        Ok(db)
    }

    /// Path to the underlying SQLite file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Open a connection with the standard pragmas applied.
    pub(crate) fn connect(&self) -> rusqlite::Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    /// Run a storage operation on the blocking pool.
    pub(crate) async fn run_blocking<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce(Connection) -> Result<T, ApiError> + Send + 'static,
    {
        let db = self.clone();
        task::spawn_blocking(move || {
            let conn = db.connect()?;
            f(conn)
        })
        .await?
    }

    /// Migrate database schema to the latest version.
    async fn migrate_schema(&self) -> anyhow::Result<()> {
        let db = self.clone();
        task::spawn_blocking(move || -> anyhow::Result<()> {
            let conn = db.connect().context("Failed to open database")?;
            conn.execute_batch(schema::SQLITE_SCHEMA)
                .context("Failed to migrate schema")?;
            Ok(())
        })
        .await
        .context("Failed to spawn blocking task")??;

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Database;
    use tempfile::TempDir;

    /// Open a throwaway database for store tests.
    pub async fn open_test_db() -> (Database, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path().join("test.db")).await.unwrap();
        (db, dir)
    }
}
