//! Task instance: the single-writer coordinator for one task.
//!
//! Mutating operations take the writer lock, run one store transaction,
//! and broadcast the resulting event while still holding the lock so
//! history order, event order, and per-socket delivery order all agree.
//! The broadcast itself only enqueues on bounded channels; no network
//! I/O happens under the lock.

use std::sync::Arc;

use axum::extract::ws::WebSocket;
use tokio::sync::Mutex;

use crate::config::WebSocketConfig;
use crate::database::{Database, IdemWrite, TaskStore, TaskWrite};
use crate::domain::{TaskEventType, TaskHistoryEntry, TaskRecord};
use crate::error::ApiError;
use crate::events::{TaskEvent, TaskEventBody};
use crate::fanout::{FanOut, CLOSE_NORMAL};

/// Single-writer coordinator owning one task's state, history, and
/// subscribers.
#[derive(Debug)]
pub struct TaskInstance {
    task_id: String,
    store: TaskStore,
    fanout: Arc<FanOut>,
    writer: Mutex<()>,
}

impl TaskInstance {
    pub(crate) fn new(task_id: String, db: Database, ws_config: WebSocketConfig) -> Self {
        let fanout = Arc::new(FanOut::new(format!("task/{task_id}"), ws_config));
        Self {
            task_id,
            store: TaskStore::new(db),
            fanout,
            writer: Mutex::new(()),
        }
    }

    /// Whether a metadata row exists for this ID.
    pub async fn exists(&self) -> Result<bool, ApiError> {
        Ok(self.store.get(&self.task_id).await?.is_some())
    }

    /// Persist the metadata row in `pending` and register the ID.
    pub async fn create(
        &self,
        metadata: serde_json::Value,
        created_by: &str,
        idem: Option<IdemWrite>,
    ) -> Result<serde_json::Value, ApiError> {
        let _guard = self.writer.lock().await;
        let (_record, response) = self
            .store
            .create(&self.task_id, metadata, created_by, idem)
            .await?;
        Ok(response)
    }

    pub async fn update_progress(
        &self,
        progress: i64,
        message: Option<String>,
        idem: Option<IdemWrite>,
    ) -> Result<serde_json::Value, ApiError> {
        let _guard = self.writer.lock().await;
        let write = self
            .store
            .update_progress(&self.task_id, progress, message, idem)
            .await?;
        if let Some(history) = &write.history {
            self.fanout.broadcast(&TaskEvent::Progress {
                progress: history.progress.unwrap_or(progress),
                timestamp: history.timestamp.clone(),
                task: write.record.clone(),
            });
        }
        Ok(write.response)
    }

    pub async fn append_event(
        &self,
        event_type: TaskEventType,
        message: String,
        progress: Option<i64>,
        metadata: Option<serde_json::Value>,
        idem: Option<IdemWrite>,
    ) -> Result<serde_json::Value, ApiError> {
        let _guard = self.writer.lock().await;
        let write = self
            .store
            .append_event(&self.task_id, event_type, message, progress, metadata, idem)
            .await?;
        if let Some(history) = &write.history {
            self.fanout.broadcast(&TaskEvent::Event {
                task: write.record.clone(),
                event: TaskEventBody {
                    event_type: history.event_type,
                    message: history.message.clone(),
                    progress: history.progress,
                    metadata: history.metadata.clone(),
                },
                timestamp: history.timestamp.clone(),
            });
        }
        Ok(write.response)
    }

    pub async fn complete(&self, idem: Option<IdemWrite>) -> Result<serde_json::Value, ApiError> {
        let _guard = self.writer.lock().await;
        let write = self.store.complete(&self.task_id, idem).await?;
        self.broadcast_terminal(&write, TerminalKind::Complete);
        Ok(write.response)
    }

    pub async fn fail(
        &self,
        error: String,
        idem: Option<IdemWrite>,
    ) -> Result<serde_json::Value, ApiError> {
        let _guard = self.writer.lock().await;
        let write = self.store.fail(&self.task_id, error, idem).await?;
        self.broadcast_terminal(&write, TerminalKind::Fail);
        Ok(write.response)
    }

    pub async fn cancel(&self, idem: Option<IdemWrite>) -> Result<serde_json::Value, ApiError> {
        let _guard = self.writer.lock().await;
        let write = self.store.cancel(&self.task_id, idem).await?;
        self.broadcast_terminal(&write, TerminalKind::Cancel);
        Ok(write.response)
    }

    /// Committed snapshot, served without the writer lock.
    pub async fn get(&self) -> Result<TaskRecord, ApiError> {
        self.store
            .get(&self.task_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("task {} not found", self.task_id)))
    }

    /// Newest-first history.
    pub async fn history(&self, limit: usize) -> Result<Vec<TaskHistoryEntry>, ApiError> {
        self.store.history(&self.task_id, limit).await
    }

    /// Tear down state, history, registry row, and live subscribers.
    pub async fn delete(&self, idem: Option<IdemWrite>) -> Result<serde_json::Value, ApiError> {
        let _guard = self.writer.lock().await;
        let response = self.store.delete(&self.task_id, idem).await?;
        self.fanout.close_all(CLOSE_NORMAL);
        Ok(response)
    }

    /// Register a live socket with this task's fan-out.
    pub async fn attach_subscriber(&self, socket: WebSocket) {
        self.fanout.clone().attach(socket).await;
    }

    fn broadcast_terminal(&self, write: &TaskWrite, kind: TerminalKind) {
        let Some(history) = &write.history else {
            return;
        };
        let task = write.record.clone();
        let timestamp = history.timestamp.clone();
        let event = match kind {
            TerminalKind::Complete => TaskEvent::Complete { task, timestamp },
            TerminalKind::Fail => TaskEvent::Fail { task, timestamp },
            TerminalKind::Cancel => TaskEvent::Cancel { task, timestamp },
        };
        self.fanout.broadcast(&event);
    }
}

enum TerminalKind {
    Complete,
    Fail,
    Cancel,
}
