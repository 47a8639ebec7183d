//! Entity instances and the in-memory instance directory.
//!
//! The directory maps `(kind, id)` to the owning instance handle,
//! lazily constructed on first reference. Handles are cheap until the
//! entity is created; operations against a handle whose entity does not
//! exist return `NOT_FOUND` from the store.

pub mod task;
pub mod workflow;

pub use task::TaskInstance;
pub use workflow::WorkflowInstance;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::AppConfig;
use crate::database::{Database, RegistryStore};
use crate::domain::{EntityKind, TaskRecord, WorkflowRecord};
use crate::error::ApiError;

/// In-memory directory of live instance handles.
#[derive(Debug)]
pub struct InstanceDirectory {
    db: Database,
    config: Arc<AppConfig>,
    registry: RegistryStore,
    tasks: RwLock<HashMap<String, Arc<TaskInstance>>>,
    workflows: RwLock<HashMap<String, Arc<WorkflowInstance>>>,
}

impl InstanceDirectory {
    #[must_use]
    pub fn new(db: Database, config: Arc<AppConfig>) -> Self {
        let registry = RegistryStore::new(db.clone());
        Self {
            db,
            config,
            registry,
            tasks: RwLock::new(HashMap::new()),
            workflows: RwLock::new(HashMap::new()),
        }
    }

    /// Handle for a task ID, constructing it on first reference.
    pub fn task(&self, id: &str) -> Arc<TaskInstance> {
        if let Some(instance) = self.tasks.read().get(id) {
            return instance.clone();
        }
        let mut tasks = self.tasks.write();
        tasks
            .entry(id.to_string())
            .or_insert_with(|| {
                Arc::new(TaskInstance::new(
                    id.to_string(),
                    self.db.clone(),
                    self.config.websocket.clone(),
                ))
            })
            .clone()
    }

    /// Handle for a workflow ID, constructing it on first reference.
    pub fn workflow(&self, id: &str) -> Arc<WorkflowInstance> {
        if let Some(instance) = self.workflows.read().get(id) {
            return instance.clone();
        }
        let mut workflows = self.workflows.write();
        workflows
            .entry(id.to_string())
            .or_insert_with(|| {
                Arc::new(WorkflowInstance::new(
                    id.to_string(),
                    self.db.clone(),
                    self.config.websocket.clone(),
                ))
            })
            .clone()
    }

    /// Snapshot of every registered task.
    pub async fn task_snapshots(&self) -> Result<Vec<TaskRecord>, ApiError> {
        let mut snapshots = Vec::new();
        for row in self.registry.list(EntityKind::Task).await? {
            match self.task(&row.id).get().await {
                Ok(record) => snapshots.push(record),
                Err(ApiError::NotFound(_)) => {
                    tracing::warn!(id = %row.id, "Registered task has no metadata row");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(snapshots)
    }

    /// Snapshot of every registered workflow.
    pub async fn workflow_snapshots(&self) -> Result<Vec<WorkflowRecord>, ApiError> {
        let mut snapshots = Vec::new();
        for row in self.registry.list(EntityKind::Workflow).await? {
            match self.workflow(&row.id).get().await {
                Ok(record) => snapshots.push(record),
                Err(ApiError::NotFound(_)) => {
                    tracing::warn!(id = %row.id, "Registered workflow has no metadata row");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(snapshots)
    }

    /// Delete one entity and evict its handle.
    pub async fn delete(
        &self,
        kind: EntityKind,
        id: &str,
        idem: Option<crate::database::IdemWrite>,
    ) -> Result<serde_json::Value, ApiError> {
        let response = match kind {
            EntityKind::Task => self.task(id).delete(idem).await?,
            EntityKind::Workflow => self.workflow(id).delete(idem).await?,
        };
        match kind {
            EntityKind::Task => {
                self.tasks.write().remove(id);
            }
            EntityKind::Workflow => {
                self.workflows.write().remove(id);
            }
        }
        Ok(response)
    }

    /// Delete every registered entity of a kind, collecting per-ID
    /// failures instead of aborting the sweep.
    pub async fn delete_all(&self, kind: EntityKind) -> Result<serde_json::Value, ApiError> {
        let rows = self.registry.list(kind).await?;
        let mut deleted = 0u64;
        let mut failures = Vec::new();

        for row in rows {
            match self.delete(kind, &row.id, None).await {
                Ok(_) => deleted += 1,
                Err(e) => {
                    tracing::warn!(kind = kind.as_str(), id = %row.id, error = %e, "Delete failed");
                    failures.push(serde_json::json!({
                        "id": row.id,
                        "code": e.code(),
                        "message": e.to_string(),
                    }));
                }
            }
        }

        Ok(serde_json::json!({ "deleted": deleted, "failures": failures }))
    }

    /// Registered entity counts, for the health endpoint.
    pub async fn entity_counts(&self) -> Result<(i64, i64), ApiError> {
        let tasks = self.registry.count(EntityKind::Task).await?;
        let workflows = self.registry.count(EntityKind::Workflow).await?;
        Ok((tasks, workflows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::open_test_db;
    use crate::domain::{EntityStatus, PhaseSpec};

    async fn directory() -> (Arc<InstanceDirectory>, tempfile::TempDir) {
        let (db, dir) = open_test_db().await;
        let config = Arc::new(AppConfig::default());
        (Arc::new(InstanceDirectory::new(db, config)), dir)
    }

    #[tokio::test]
    async fn test_handles_are_singletons() {
        let (directory, _dir) = directory().await;
        let a = directory.task("TASK-A");
        let b = directory.task("TASK-A");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_create_and_enumerate() {
        let (directory, _dir) = directory().await;

        directory
            .task("TASK-A")
            .create(serde_json::json!({}), "tester", None)
            .await
            .unwrap();
        directory
            .workflow("WF-1")
            .create(
                vec![PhaseSpec {
                    key: "build".into(),
                    label: None,
                    weight: None,
                }],
                serde_json::json!({}),
                "tester",
                None,
            )
            .await
            .unwrap();

        let tasks = directory.task_snapshots().await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].task_id, "TASK-A");
        assert_eq!(tasks[0].status, EntityStatus::Pending);

        let (task_count, workflow_count) = directory.entity_counts().await.unwrap();
        assert_eq!((task_count, workflow_count), (1, 1));
    }

    #[tokio::test]
    async fn test_delete_all_reports_counts() {
        let (directory, _dir) = directory().await;

        for id in ["TASK-A", "TASK-B"] {
            directory
                .task(id)
                .create(serde_json::json!({}), "tester", None)
                .await
                .unwrap();
        }

        let response = directory.delete_all(EntityKind::Task).await.unwrap();
        assert_eq!(response["deleted"], 2);
        assert_eq!(response["failures"].as_array().unwrap().len(), 0);
        assert!(directory.task_snapshots().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_unknown_task() {
        let (directory, _dir) = directory().await;
        let err = directory
            .delete(EntityKind::Task, "ghost", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_writes_serialized_per_instance() {
        let (directory, _dir) = directory().await;
        let instance = directory.task("TASK-A");
        instance
            .create(serde_json::json!({}), "tester", None)
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..10 {
            let instance = directory.task("TASK-A");
            handles.push(tokio::spawn(async move {
                instance.update_progress(i * 10, None, None).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // One history row per write, ordered by insertion.
        let history = instance.history(50).await.unwrap();
        assert_eq!(history.len(), 10);
        for pair in history.windows(2) {
            assert!(pair[0].id > pair[1].id);
        }
    }
}
