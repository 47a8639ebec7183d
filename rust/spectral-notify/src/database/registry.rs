//! Cross-entity registry.
//!
//! One small table per kind listing every created ID, so `getAll` and
//! `deleteAll` can enumerate entities without traversing instances.

use rusqlite::{params, Connection};

use crate::domain::{EntityKind, RegistryRow};
use crate::error::ApiError;

use super::Database;

fn table(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Task => "task_registry",
        EntityKind::Workflow => "workflow_registry",
    }
}

/// Insert a registry row inside an open entity-create transaction.
pub(crate) fn insert(
    conn: &Connection,
    kind: EntityKind,
    id: &str,
    created_by: &str,
    created_at: &str,
) -> Result<(), ApiError> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO {} (id, created_at, created_by) VALUES (?1, ?2, ?3)",
            table(kind)
        ),
        params![id, created_at, created_by],
    )?;
    Ok(())
}

/// Remove a registry row inside an open entity-delete transaction.
pub(crate) fn remove(conn: &Connection, kind: EntityKind, id: &str) -> Result<(), ApiError> {
    conn.execute(
        &format!("DELETE FROM {} WHERE id = ?1", table(kind)),
        params![id],
    )?;
    Ok(())
}

/// Async registry reader.
#[derive(Debug, Clone)]
pub struct RegistryStore {
    db: Database,
}

impl RegistryStore {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// List all known IDs for a kind, oldest first.
    pub async fn list(&self, kind: EntityKind) -> Result<Vec<RegistryRow>, ApiError> {
        self.db
            .run_blocking(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT id, created_at, created_by FROM {} ORDER BY created_at, id",
                    table(kind)
                ))?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok(RegistryRow {
                            id: row.get(0)?,
                            created_at: row.get(1)?,
                            created_by: row.get(2)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Count known IDs for a kind.
    pub async fn count(&self, kind: EntityKind) -> Result<i64, ApiError> {
        self.db
            .run_blocking(move |conn| {
                let count: i64 = conn.query_row(
                    &format!("SELECT COUNT(*) FROM {}", table(kind)),
                    [],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await
    }
}
