//! Idempotency key storage.
//!
//! Rows live for 24 hours (configurable) and are reaped opportunistically:
//! any write may drop up to `reap_batch` expired rows. Successful write
//! responses are inserted inside the same transaction as the state
//! mutation; deterministic validation errors are cached after the fact.

use chrono::{Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::domain::now_rfc3339;
use crate::error::ApiError;

use super::Database;

/// Response cached under an idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    /// HTTP status code of the original response.
    pub status: u16,
    /// Response body as JSON.
    pub body: serde_json::Value,
}

/// A stored idempotency row.
#[derive(Debug, Clone)]
pub struct IdempotencyRow {
    pub key: String,
    pub endpoint: String,
    pub request_hash: Option<String>,
    pub response: CachedResponse,
    pub created_at: String,
    pub expires_at: String,
}

/// Pending idempotency insert, threaded into a store transaction so the
/// cached response commits atomically with the state mutation.
#[derive(Debug, Clone)]
pub struct IdemWrite {
    pub key: String,
    pub endpoint: String,
    pub request_hash: Option<String>,
    pub ttl_secs: i64,
    pub reap_batch: usize,
}

/// Insert a cached response inside an open transaction.
///
/// Uses `INSERT OR IGNORE`: under a concurrent race on the same key the
/// first committed response wins, preserving process-wide key uniqueness.
pub(crate) fn record_response(
    conn: &Connection,
    idem: &IdemWrite,
    status: u16,
    body: &serde_json::Value,
) -> Result<(), ApiError> {
    reap_expired(conn, idem.reap_batch)?;

    let now = now_rfc3339();
    let expires_at = (Utc::now() + Duration::seconds(idem.ttl_secs))
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
    let response = serde_json::to_string(&CachedResponse {
        status,
        body: body.clone(),
    })?;

    conn.execute(
        r"
        INSERT OR IGNORE INTO idempotency_keys (key, endpoint, request_hash, response, created_at, expires_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ",
        params![
            &idem.key,
            &idem.endpoint,
            &idem.request_hash,
            &response,
            &now,
            &expires_at
        ],
    )?;

    Ok(())
}

/// Drop up to `limit` expired rows.
fn reap_expired(conn: &Connection, limit: usize) -> Result<(), ApiError> {
    if limit == 0 {
        return Ok(());
    }
    let now = now_rfc3339();
    let dropped = conn.execute(
        r"
        DELETE FROM idempotency_keys
        WHERE key IN (
            SELECT key FROM idempotency_keys WHERE expires_at <= ?1 LIMIT ?2
        )
        ",
        params![&now, limit as i64],
    )?;
    if dropped > 0 {
        tracing::debug!(dropped, "Reaped expired idempotency rows");
    }
    Ok(())
}

/// Async store used by the gateway for lookups and error caching.
#[derive(Debug, Clone)]
pub struct IdempotencyStore {
    db: Database,
    ttl_secs: i64,
    reap_batch: usize,
}

impl IdempotencyStore {
    #[must_use]
    pub fn new(db: Database, ttl_secs: i64, reap_batch: usize) -> Self {
        Self {
            db,
            ttl_secs,
            reap_batch,
        }
    }

    /// Build the pending insert handed into a store transaction.
    #[must_use]
    pub fn make_write(
        &self,
        key: String,
        endpoint: &str,
        request_hash: Option<String>,
    ) -> IdemWrite {
        IdemWrite {
            key,
            endpoint: endpoint.to_string(),
            request_hash,
            ttl_secs: self.ttl_secs,
            reap_batch: self.reap_batch,
        }
    }

    /// Look up a non-expired row by key.
    pub async fn lookup(&self, key: &str) -> Result<Option<IdempotencyRow>, ApiError> {
        let key = key.to_string();
        self.db
            .run_blocking(move |conn| {
                let now = now_rfc3339();
                let row: Option<(String, Option<String>, String, String, String)> = conn
                    .query_row(
                        r"
                        SELECT endpoint, request_hash, response, created_at, expires_at
                        FROM idempotency_keys
                        WHERE key = ?1 AND expires_at > ?2
                        ",
                        params![&key, &now],
                        |row| {
                            Ok((
                                row.get(0)?,
                                row.get(1)?,
                                row.get(2)?,
                                row.get(3)?,
                                row.get(4)?,
                            ))
                        },
                    )
                    .optional()?;

                match row {
                    Some((endpoint, request_hash, response, created_at, expires_at)) => {
                        let response: CachedResponse = serde_json::from_str(&response)?;
                        Ok(Some(IdempotencyRow {
                            key,
                            endpoint,
                            request_hash,
                            response,
                            created_at,
                            expires_at,
                        }))
                    }
                    None => Ok(None),
                }
            })
            .await
    }

    /// Cache a response outside a store transaction.
    ///
    /// Used for deterministic validation errors (which mutate nothing)
    /// and for compound operations like `deleteAll`.
    pub async fn cache_response(
        &self,
        key: String,
        endpoint: &str,
        request_hash: Option<String>,
        status: u16,
        body: serde_json::Value,
    ) -> Result<(), ApiError> {
        let idem = self.make_write(key, endpoint, request_hash);
        self.db
            .run_blocking(move |conn| record_response(&conn, &idem, status, &body))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::open_test_db;

    fn store(db: Database) -> IdempotencyStore {
        IdempotencyStore::new(db, 24 * 60 * 60, 32)
    }

    #[tokio::test]
    async fn test_lookup_missing() {
        let (db, _dir) = open_test_db().await;
        let store = store(db);
        assert!(store.lookup("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cache_and_lookup() {
        let (db, _dir) = open_test_db().await;
        let store = store(db);

        store
            .cache_response(
                "key-1".into(),
                "/tasks/create",
                Some("abc".into()),
                200,
                serde_json::json!({"ok": true}),
            )
            .await
            .unwrap();

        let row = store.lookup("key-1").await.unwrap().unwrap();
        assert_eq!(row.endpoint, "/tasks/create");
        assert_eq!(row.request_hash.as_deref(), Some("abc"));
        assert_eq!(row.response.status, 200);
        assert_eq!(row.response.body["ok"], true);
    }

    #[tokio::test]
    async fn test_first_insert_wins() {
        let (db, _dir) = open_test_db().await;
        let store = store(db);

        store
            .cache_response(
                "key-1".into(),
                "/tasks/create",
                None,
                200,
                serde_json::json!({"first": true}),
            )
            .await
            .unwrap();
        store
            .cache_response(
                "key-1".into(),
                "/tasks/complete",
                None,
                200,
                serde_json::json!({"second": true}),
            )
            .await
            .unwrap();

        let row = store.lookup("key-1").await.unwrap().unwrap();
        assert_eq!(row.endpoint, "/tasks/create");
        assert_eq!(row.response.body["first"], true);
    }

    #[tokio::test]
    async fn test_expired_rows_invisible() {
        let (db, _dir) = open_test_db().await;
        let store = IdempotencyStore::new(db, -1, 32);

        store
            .cache_response(
                "key-1".into(),
                "/tasks/create",
                None,
                200,
                serde_json::json!({}),
            )
            .await
            .unwrap();

        assert!(store.lookup("key-1").await.unwrap().is_none());
    }
}
