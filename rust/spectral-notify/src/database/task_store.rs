//! Task state and history storage.
//!
//! Every mutating operation is one `BEGIN IMMEDIATE` transaction that
//! validates the transition, writes the metadata row, appends the
//! history row, and records the idempotency response before committing.
//! A `TaskWrite` with `history: None` is an identity re-apply: the
//! requested state already held, nothing changed, no event is emitted.

use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};

use crate::domain::{
    monotonic, now_rfc3339, EntityKind, EntityStatus, TaskEventType, TaskHistoryEntry, TaskRecord,
};
use crate::error::ApiError;

use super::idempotency::{record_response, IdemWrite};
use super::{registry, Database};

/// Outcome of a mutating task operation.
#[derive(Debug, Clone)]
pub struct TaskWrite {
    /// Committed snapshot after the write.
    pub record: TaskRecord,
    /// Appended history row; `None` for identity re-applies.
    pub history: Option<TaskHistoryEntry>,
    /// REST response body, as cached under the idempotency key.
    pub response: serde_json::Value,
}

/// Task metadata and history store.
#[derive(Debug, Clone)]
pub struct TaskStore {
    db: Database,
}

impl TaskStore {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a task in `pending` and register it.
    pub async fn create(
        &self,
        task_id: &str,
        metadata: serde_json::Value,
        created_by: &str,
        idem: Option<IdemWrite>,
    ) -> Result<(TaskRecord, serde_json::Value), ApiError> {
        let task_id = task_id.to_string();
        let created_by = created_by.to_string();

        self.db
            .run_blocking(move |mut conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let now = now_rfc3339();
                let metadata_json = metadata.to_string();

                match tx.execute(
                    r"
                    INSERT INTO task_metadata (task_id, status, created_at, updated_at, metadata)
                    VALUES (?1, 'pending', ?2, ?2, ?3)
                    ",
                    params![&task_id, &now, &metadata_json],
                ) {
                    Ok(_) => {}
                    Err(rusqlite::Error::SqliteFailure(e, _))
                        if e.code == ErrorCode::ConstraintViolation =>
                    {
                        return Err(ApiError::DuplicateEntity(format!(
                            "task {task_id} already exists"
                        )));
                    }
                    Err(e) => return Err(e.into()),
                }

                registry::insert(&tx, EntityKind::Task, &task_id, &created_by, &now)?;

                let record = TaskRecord {
                    task_id,
                    status: EntityStatus::Pending,
                    progress: None,
                    created_at: now.clone(),
                    updated_at: now,
                    completed_at: None,
                    failed_at: None,
                    canceled_at: None,
                    metadata,
                };
                let response = serde_json::json!({ "task": serde_json::to_value(&record)? });

                if let Some(idem) = &idem {
                    record_response(&tx, idem, 200, &response)?;
                }
                tx.commit()?;

                Ok((record, response))
            })
            .await
    }

    /// Report progress; first report moves a pending task to `in-progress`.
    pub async fn update_progress(
        &self,
        task_id: &str,
        progress: i64,
        message: Option<String>,
        idem: Option<IdemWrite>,
    ) -> Result<TaskWrite, ApiError> {
        let task_id = task_id.to_string();

        self.db
            .run_blocking(move |mut conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let mut record = require_task(&tx, &task_id)?;

                if record.status.is_terminal() {
                    if record.progress == Some(progress) {
                        return identity(tx, record, idem.as_ref());
                    }
                    return Err(terminal(&record));
                }

                let now = monotonic(now_rfc3339(), &record.updated_at);
                if record.status == EntityStatus::Pending {
                    record.status = EntityStatus::InProgress;
                }
                record.progress = Some(progress);
                record.updated_at = now.clone();

                tx.execute(
                    "UPDATE task_metadata SET status = ?1, progress = ?2, updated_at = ?3 WHERE task_id = ?4",
                    params![record.status.as_str(), progress, &now, &task_id],
                )?;

                let message = message.unwrap_or_else(|| format!("progress {progress}%"));
                let history = append_history(
                    &tx,
                    &task_id,
                    TaskEventType::Progress,
                    &message,
                    Some(progress),
                    None,
                    &now,
                )?;

                commit_write(tx, record, Some(history), idem.as_ref())
            })
            .await
    }

    /// Append a caller-supplied history event without transitioning status.
    pub async fn append_event(
        &self,
        task_id: &str,
        event_type: TaskEventType,
        message: String,
        progress: Option<i64>,
        metadata: Option<serde_json::Value>,
        idem: Option<IdemWrite>,
    ) -> Result<TaskWrite, ApiError> {
        let task_id = task_id.to_string();

        self.db
            .run_blocking(move |mut conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let mut record = require_task(&tx, &task_id)?;

                if record.status.is_terminal() {
                    return Err(terminal(&record));
                }

                let now = monotonic(now_rfc3339(), &record.updated_at);
                record.updated_at = now.clone();

                tx.execute(
                    "UPDATE task_metadata SET updated_at = ?1 WHERE task_id = ?2",
                    params![&now, &task_id],
                )?;

                let history = append_history(
                    &tx,
                    &task_id,
                    event_type,
                    &message,
                    progress,
                    metadata.as_ref(),
                    &now,
                )?;

                commit_write(tx, record, Some(history), idem.as_ref())
            })
            .await
    }

    /// Transition to `success`, forcing progress to 100.
    pub async fn complete(
        &self,
        task_id: &str,
        idem: Option<IdemWrite>,
    ) -> Result<TaskWrite, ApiError> {
        self.terminal_transition(
            task_id,
            EntityStatus::Success,
            TaskEventType::Success,
            "task completed".to_string(),
            idem,
        )
        .await
    }

    /// Transition to `failed`, recording the error message.
    pub async fn fail(
        &self,
        task_id: &str,
        error: String,
        idem: Option<IdemWrite>,
    ) -> Result<TaskWrite, ApiError> {
        self.terminal_transition(task_id, EntityStatus::Failed, TaskEventType::Error, error, idem)
            .await
    }

    /// Transition to `canceled`.
    pub async fn cancel(
        &self,
        task_id: &str,
        idem: Option<IdemWrite>,
    ) -> Result<TaskWrite, ApiError> {
        self.terminal_transition(
            task_id,
            EntityStatus::Canceled,
            TaskEventType::Cancel,
            "task canceled".to_string(),
            idem,
        )
        .await
    }

    async fn terminal_transition(
        &self,
        task_id: &str,
        target: EntityStatus,
        event_type: TaskEventType,
        message: String,
        idem: Option<IdemWrite>,
    ) -> Result<TaskWrite, ApiError> {
        let task_id = task_id.to_string();

        self.db
            .run_blocking(move |mut conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let mut record = require_task(&tx, &task_id)?;

                if record.status.is_terminal() {
                    // Re-applying the state that already holds is a no-op.
                    if record.status == target {
                        return identity(tx, record, idem.as_ref());
                    }
                    return Err(terminal(&record));
                }

                let now = monotonic(now_rfc3339(), &record.updated_at);
                record.status = target;
                record.updated_at = now.clone();
                match target {
                    EntityStatus::Success => {
                        record.completed_at = Some(now.clone());
                        record.progress = Some(100);
                    }
                    EntityStatus::Failed => record.failed_at = Some(now.clone()),
                    EntityStatus::Canceled => record.canceled_at = Some(now.clone()),
                    EntityStatus::Pending | EntityStatus::InProgress => unreachable!(),
                }

                tx.execute(
                    r"
                    UPDATE task_metadata
                    SET status = ?1, progress = ?2, updated_at = ?3,
                        completed_at = ?4, failed_at = ?5, canceled_at = ?6
                    WHERE task_id = ?7
                    ",
                    params![
                        record.status.as_str(),
                        record.progress,
                        &now,
                        record.completed_at,
                        record.failed_at,
                        record.canceled_at,
                        &task_id
                    ],
                )?;

                let history =
                    append_history(&tx, &task_id, event_type, &message, None, None, &now)?;

                commit_write(tx, record, Some(history), idem.as_ref())
            })
            .await
    }

    /// Read the committed snapshot without mutating.
    pub async fn get(&self, task_id: &str) -> Result<Option<TaskRecord>, ApiError> {
        let task_id = task_id.to_string();
        self.db
            .run_blocking(move |conn| read_task(&conn, &task_id))
            .await
    }

    /// Newest-first history, at most `limit` rows.
    pub async fn history(
        &self,
        task_id: &str,
        limit: usize,
    ) -> Result<Vec<TaskHistoryEntry>, ApiError> {
        let task_id = task_id.to_string();

        self.db
            .run_blocking(move |conn| {
                require_task(&conn, &task_id)?;

                let mut stmt = conn.prepare(
                    r"
                    SELECT id, event_type, message, progress, timestamp, metadata
                    FROM task_history
                    WHERE task_id = ?1
                    ORDER BY id DESC
                    LIMIT ?2
                    ",
                )?;
                let rows: Vec<(i64, String, String, Option<i64>, String, Option<String>)> = stmt
                    .query_map(params![&task_id, limit as i64], |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                rows.into_iter()
                    .map(|(id, event_type, message, progress, timestamp, metadata)| {
                        Ok(TaskHistoryEntry {
                            id,
                            task_id: task_id.clone(),
                            event_type: TaskEventType::parse(&event_type)?,
                            message,
                            progress,
                            timestamp,
                            metadata: metadata
                                .map(|m| serde_json::from_str(&m))
                                .transpose()?,
                        })
                    })
                    .collect()
            })
            .await
    }

    /// Tear down the task: metadata, history, and registry row.
    pub async fn delete(
        &self,
        task_id: &str,
        idem: Option<IdemWrite>,
    ) -> Result<serde_json::Value, ApiError> {
        let task_id = task_id.to_string();

        self.db
            .run_blocking(move |mut conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                require_task(&tx, &task_id)?;

                tx.execute("DELETE FROM task_history WHERE task_id = ?1", params![&task_id])?;
                tx.execute("DELETE FROM task_metadata WHERE task_id = ?1", params![&task_id])?;
                registry::remove(&tx, EntityKind::Task, &task_id)?;

                let response = serde_json::json!({ "success": true });
                if let Some(idem) = &idem {
                    record_response(&tx, idem, 200, &response)?;
                }
                tx.commit()?;

                Ok(response)
            })
            .await
    }
}

fn terminal(record: &TaskRecord) -> ApiError {
    ApiError::TerminalState(format!(
        "task {} is {}",
        record.task_id,
        record.status.as_str()
    ))
}

fn identity(
    tx: rusqlite::Transaction<'_>,
    record: TaskRecord,
    idem: Option<&IdemWrite>,
) -> Result<TaskWrite, ApiError> {
    let response = serde_json::to_value(&record)?;
    if let Some(idem) = idem {
        record_response(&tx, idem, 200, &response)?;
    }
    tx.commit()?;
    Ok(TaskWrite {
        record,
        history: None,
        response,
    })
}

fn commit_write(
    tx: rusqlite::Transaction<'_>,
    record: TaskRecord,
    history: Option<TaskHistoryEntry>,
    idem: Option<&IdemWrite>,
) -> Result<TaskWrite, ApiError> {
    let response = serde_json::to_value(&record)?;
    if let Some(idem) = idem {
        record_response(&tx, idem, 200, &response)?;
    }
    tx.commit()?;
    Ok(TaskWrite {
        record,
        history,
        response,
    })
}

fn require_task(conn: &Connection, task_id: &str) -> Result<TaskRecord, ApiError> {
    read_task(conn, task_id)?
        .ok_or_else(|| ApiError::NotFound(format!("task {task_id} not found")))
}

fn read_task(conn: &Connection, task_id: &str) -> Result<Option<TaskRecord>, ApiError> {
    type Row = (
        String,
        Option<i64>,
        String,
        String,
        Option<String>,
        Option<String>,
        Option<String>,
        String,
    );

    let row: Option<Row> = conn
        .query_row(
            r"
            SELECT status, progress, created_at, updated_at, completed_at, failed_at, canceled_at, metadata
            FROM task_metadata
            WHERE task_id = ?1
            ",
            params![task_id],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                ))
            },
        )
        .optional()?;

    match row {
        Some((status, progress, created_at, updated_at, completed_at, failed_at, canceled_at, metadata)) => {
            Ok(Some(TaskRecord {
                task_id: task_id.to_string(),
                status: EntityStatus::parse(&status)?,
                progress,
                created_at,
                updated_at,
                completed_at,
                failed_at,
                canceled_at,
                metadata: serde_json::from_str(&metadata)?,
            }))
        }
        None => Ok(None),
    }
}

fn append_history(
    conn: &Connection,
    task_id: &str,
    event_type: TaskEventType,
    message: &str,
    progress: Option<i64>,
    metadata: Option<&serde_json::Value>,
    timestamp: &str,
) -> Result<TaskHistoryEntry, ApiError> {
    conn.execute(
        r"
        INSERT INTO task_history (task_id, event_type, message, progress, timestamp, metadata)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ",
        params![
            task_id,
            event_type.as_str(),
            message,
            progress,
            timestamp,
            metadata.map(std::string::ToString::to_string)
        ],
    )?;

    Ok(TaskHistoryEntry {
        id: conn.last_insert_rowid(),
        task_id: task_id.to_string(),
        event_type,
        message: message.to_string(),
        progress,
        timestamp: timestamp.to_string(),
        metadata: metadata.cloned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::open_test_db;

    async fn create_test_store() -> (TaskStore, tempfile::TempDir) {
        let (db, dir) = open_test_db().await;
        (TaskStore::new(db), dir)
    }

    #[tokio::test]
    async fn test_create_task() {
        let (store, _dir) = create_test_store().await;

        let (record, response) = store
            .create("TASK-A", serde_json::json!({"author": "tester"}), "tester", None)
            .await
            .unwrap();

        assert_eq!(record.task_id, "TASK-A");
        assert_eq!(record.status, EntityStatus::Pending);
        assert!(record.progress.is_none());
        assert_eq!(response["task"]["taskId"], "TASK-A");
    }

    #[tokio::test]
    async fn test_create_duplicate() {
        let (store, _dir) = create_test_store().await;

        store
            .create("TASK-A", serde_json::json!({}), "tester", None)
            .await
            .unwrap();
        let err = store
            .create("TASK-A", serde_json::json!({}), "tester", None)
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::DuplicateEntity(_)));
    }

    #[tokio::test]
    async fn test_update_progress_transitions_pending() {
        let (store, _dir) = create_test_store().await;

        store
            .create("TASK-A", serde_json::json!({}), "tester", None)
            .await
            .unwrap();
        let write = store
            .update_progress("TASK-A", 50, Some("half".into()), None)
            .await
            .unwrap();

        assert_eq!(write.record.status, EntityStatus::InProgress);
        assert_eq!(write.record.progress, Some(50));

        let history = write.history.unwrap();
        assert_eq!(history.event_type, TaskEventType::Progress);
        assert_eq!(history.message, "half");
        assert_eq!(history.progress, Some(50));
    }

    #[tokio::test]
    async fn test_update_progress_unknown_task() {
        let (store, _dir) = create_test_store().await;

        let err = store
            .update_progress("ghost", 10, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_complete_seals_task() {
        let (store, _dir) = create_test_store().await;

        store
            .create("TASK-A", serde_json::json!({}), "tester", None)
            .await
            .unwrap();
        let write = store.complete("TASK-A", None).await.unwrap();
        assert_eq!(write.record.status, EntityStatus::Success);
        assert_eq!(write.record.progress, Some(100));
        assert!(write.record.completed_at.is_some());

        // Any mutating call that would change state now fails.
        let err = store
            .update_progress("TASK-A", 10, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::TerminalState(_)));

        let err = store.cancel("TASK-A", None).await.unwrap_err();
        assert!(matches!(err, ApiError::TerminalState(_)));

        // And no new history rows appear.
        let history = store.history("TASK-A", 50).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_terminal_identity_reapply() {
        let (store, _dir) = create_test_store().await;

        store
            .create("TASK-A", serde_json::json!({}), "tester", None)
            .await
            .unwrap();
        store.complete("TASK-A", None).await.unwrap();

        // Re-applying the same terminal state is a no-op, not an error.
        let write = store.complete("TASK-A", None).await.unwrap();
        assert!(write.history.is_none());
        assert_eq!(write.record.status, EntityStatus::Success);

        // Same-progress update on a terminal task is also an identity write.
        let write = store
            .update_progress("TASK-A", 100, None, None)
            .await
            .unwrap();
        assert!(write.history.is_none());

        assert_eq!(store.history("TASK-A", 50).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fail_records_error() {
        let (store, _dir) = create_test_store().await;

        store
            .create("TASK-A", serde_json::json!({}), "tester", None)
            .await
            .unwrap();
        let write = store
            .fail("TASK-A", "out of disk".into(), None)
            .await
            .unwrap();

        assert_eq!(write.record.status, EntityStatus::Failed);
        assert!(write.record.failed_at.is_some());
        let history = write.history.unwrap();
        assert_eq!(history.event_type, TaskEventType::Error);
        assert_eq!(history.message, "out of disk");
    }

    #[tokio::test]
    async fn test_history_newest_first_with_limit() {
        let (store, _dir) = create_test_store().await;

        store
            .create("TASK-A", serde_json::json!({}), "tester", None)
            .await
            .unwrap();
        for i in 1..=5 {
            store
                .update_progress("TASK-A", i * 10, None, None)
                .await
                .unwrap();
        }

        let history = store.history("TASK-A", 3).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].progress, Some(50));
        assert_eq!(history[2].progress, Some(30));
        // IDs strictly decreasing in newest-first order.
        assert!(history[0].id > history[1].id && history[1].id > history[2].id);
    }

    #[tokio::test]
    async fn test_append_event_keeps_status() {
        let (store, _dir) = create_test_store().await;

        store
            .create("TASK-A", serde_json::json!({}), "tester", None)
            .await
            .unwrap();
        let write = store
            .append_event(
                "TASK-A",
                TaskEventType::Log,
                "warming caches".into(),
                None,
                Some(serde_json::json!({"origin": "worker-3"})),
                None,
            )
            .await
            .unwrap();

        assert_eq!(write.record.status, EntityStatus::Pending);
        let history = write.history.unwrap();
        assert_eq!(history.event_type, TaskEventType::Log);
        assert_eq!(history.metadata.unwrap()["origin"], "worker-3");
    }

    #[tokio::test]
    async fn test_delete_tears_down() {
        let (store, _dir) = create_test_store().await;

        store
            .create("TASK-A", serde_json::json!({}), "tester", None)
            .await
            .unwrap();
        store
            .update_progress("TASK-A", 10, None, None)
            .await
            .unwrap();

        let response = store.delete("TASK-A", None).await.unwrap();
        assert_eq!(response["success"], true);
        assert!(store.get("TASK-A").await.unwrap().is_none());

        let err = store.history("TASK-A", 10).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_updated_at_monotonic() {
        let (store, _dir) = create_test_store().await;

        store
            .create("TASK-A", serde_json::json!({}), "tester", None)
            .await
            .unwrap();
        let first = store
            .update_progress("TASK-A", 10, None, None)
            .await
            .unwrap();
        let second = store
            .update_progress("TASK-A", 20, None, None)
            .await
            .unwrap();

        assert!(second.record.updated_at >= first.record.updated_at);
    }
}
