//! Workflow instance: the single-writer coordinator for one workflow.
//!
//! Shares the task instance's frame: writer lock around each store
//! transaction, broadcast under the lock, reads against the committed
//! store. The phase sub-machine lives in the store; this layer maps
//! committed writes onto broadcast events.

use std::sync::Arc;

use axum::extract::ws::WebSocket;
use tokio::sync::Mutex;

use crate::config::WebSocketConfig;
use crate::database::{Database, IdemWrite, WorkflowStore, WorkflowWrite};
use crate::domain::{PhaseRecord, PhaseSpec, WorkflowHistoryEntry, WorkflowRecord};
use crate::error::ApiError;
use crate::events::WorkflowEvent;
use crate::fanout::{FanOut, CLOSE_NORMAL};

/// Single-writer coordinator owning one workflow's state, phases,
/// history, and subscribers.
#[derive(Debug)]
pub struct WorkflowInstance {
    workflow_id: String,
    store: WorkflowStore,
    fanout: Arc<FanOut>,
    writer: Mutex<()>,
}

impl WorkflowInstance {
    pub(crate) fn new(workflow_id: String, db: Database, ws_config: WebSocketConfig) -> Self {
        let fanout = Arc::new(FanOut::new(format!("workflow/{workflow_id}"), ws_config));
        Self {
            workflow_id,
            store: WorkflowStore::new(db),
            fanout,
            writer: Mutex::new(()),
        }
    }

    pub async fn exists(&self) -> Result<bool, ApiError> {
        Ok(self.store.get(&self.workflow_id).await?.is_some())
    }

    /// Persist the metadata and phase rows in `pending` and register the ID.
    pub async fn create(
        &self,
        phases: Vec<PhaseSpec>,
        metadata: serde_json::Value,
        created_by: &str,
        idem: Option<IdemWrite>,
    ) -> Result<serde_json::Value, ApiError> {
        let _guard = self.writer.lock().await;
        let (_record, _phases, response) = self
            .store
            .create(&self.workflow_id, phases, metadata, created_by, idem)
            .await?;
        Ok(response)
    }

    pub async fn update_phase_progress(
        &self,
        phase_key: &str,
        progress: f64,
        idem: Option<IdemWrite>,
    ) -> Result<serde_json::Value, ApiError> {
        let _guard = self.writer.lock().await;
        let write = self
            .store
            .update_phase_progress(&self.workflow_id, phase_key, progress, idem)
            .await?;
        if let Some(history) = &write.history {
            self.fanout.broadcast(&WorkflowEvent::PhaseProgress {
                workflow_id: self.workflow_id.clone(),
                phase: phase_key.to_string(),
                progress: history.progress.unwrap_or(0),
                overall_progress: write.record.overall_progress,
                workflow: write.record.clone(),
                phases: write.phases.clone(),
                timestamp: history.timestamp.clone(),
            });
        }
        Ok(write.response)
    }

    pub async fn complete_phase(
        &self,
        phase_key: &str,
        idem: Option<IdemWrite>,
    ) -> Result<serde_json::Value, ApiError> {
        let _guard = self.writer.lock().await;
        let write = self
            .store
            .complete_phase(&self.workflow_id, phase_key, idem)
            .await?;
        if let Some(history) = &write.history {
            self.fanout.broadcast(&WorkflowEvent::WorkflowProgress {
                workflow_id: self.workflow_id.clone(),
                overall_progress: write.record.overall_progress,
                workflow: write.record.clone(),
                phases: write.phases.clone(),
                timestamp: history.timestamp.clone(),
            });
        }
        Ok(write.response)
    }

    pub async fn complete(
        &self,
        strict: bool,
        idem: Option<IdemWrite>,
    ) -> Result<serde_json::Value, ApiError> {
        let _guard = self.writer.lock().await;
        let write = self.store.complete(&self.workflow_id, strict, idem).await?;
        if let Some(history) = &write.history {
            self.fanout.broadcast(&WorkflowEvent::Complete {
                workflow_id: self.workflow_id.clone(),
                workflow: write.record.clone(),
                phases: write.phases.clone(),
                timestamp: history.timestamp.clone(),
            });
        }
        Ok(write.response)
    }

    pub async fn fail(
        &self,
        error: String,
        idem: Option<IdemWrite>,
    ) -> Result<serde_json::Value, ApiError> {
        let _guard = self.writer.lock().await;
        let write = self
            .store
            .fail(&self.workflow_id, error.clone(), idem)
            .await?;
        if let Some(history) = &write.history {
            self.fanout.broadcast(&WorkflowEvent::Fail {
                workflow_id: self.workflow_id.clone(),
                workflow: write.record.clone(),
                phases: write.phases.clone(),
                timestamp: history.timestamp.clone(),
                error: Some(error),
            });
        }
        Ok(write.response)
    }

    pub async fn cancel(&self, idem: Option<IdemWrite>) -> Result<serde_json::Value, ApiError> {
        let _guard = self.writer.lock().await;
        let write: WorkflowWrite = self.store.cancel(&self.workflow_id, idem).await?;
        if let Some(history) = &write.history {
            self.fanout.broadcast(&WorkflowEvent::Cancel {
                workflow_id: self.workflow_id.clone(),
                workflow: write.record.clone(),
                phases: write.phases.clone(),
                timestamp: history.timestamp.clone(),
            });
        }
        Ok(write.response)
    }

    /// Committed snapshot, served without the writer lock.
    pub async fn get(&self) -> Result<WorkflowRecord, ApiError> {
        self.store
            .get(&self.workflow_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("workflow {} not found", self.workflow_id)))
    }

    /// Ordered phase snapshots.
    pub async fn phases(&self) -> Result<Vec<PhaseRecord>, ApiError> {
        self.store.phases(&self.workflow_id).await
    }

    /// Newest-first history.
    pub async fn history(&self, limit: usize) -> Result<Vec<WorkflowHistoryEntry>, ApiError> {
        self.store.history(&self.workflow_id, limit).await
    }

    /// Tear down state, phases, history, registry row, and subscribers.
    pub async fn delete(&self, idem: Option<IdemWrite>) -> Result<serde_json::Value, ApiError> {
        let _guard = self.writer.lock().await;
        let response = self.store.delete(&self.workflow_id, idem).await?;
        self.fanout.close_all(CLOSE_NORMAL);
        Ok(response)
    }

    /// Register a live socket with this workflow's fan-out.
    pub async fn attach_subscriber(&self, socket: WebSocket) {
        self.fanout.clone().attach(socket).await;
    }
}
