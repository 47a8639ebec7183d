//! WebSocket event payloads pushed to subscribers.
//!
//! Each successful write produces exactly one event; the fan-out engine
//! serializes it once and delivers the same bytes to every live socket.
//! Shapes are tagged on `type` with camelCase field names.

use serde::{Deserialize, Serialize};

use crate::domain::{PhaseRecord, TaskEventType, TaskRecord, WorkflowRecord};

/// Inline event body carried inside a task `event` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEventBody {
    pub event_type: TaskEventType,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Events broadcast to task subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum TaskEvent {
    /// Appended history event (`log`, `error`, ... via appendEvent).
    Event {
        task: TaskRecord,
        event: TaskEventBody,
        timestamp: String,
    },
    /// Progress update.
    Progress {
        task: TaskRecord,
        progress: i64,
        timestamp: String,
    },
    /// Terminal transition to `success`.
    Complete { task: TaskRecord, timestamp: String },
    /// Terminal transition to `failed`.
    Fail { task: TaskRecord, timestamp: String },
    /// Terminal transition to `canceled`.
    Cancel { task: TaskRecord, timestamp: String },
}

/// Events broadcast to workflow subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum WorkflowEvent {
    /// A phase reported progress.
    PhaseProgress {
        workflow_id: String,
        phase: String,
        progress: i64,
        overall_progress: i64,
        workflow: WorkflowRecord,
        phases: Vec<PhaseRecord>,
        timestamp: String,
    },
    /// Workflow-level counters moved (a phase became terminal).
    WorkflowProgress {
        workflow_id: String,
        overall_progress: i64,
        workflow: WorkflowRecord,
        phases: Vec<PhaseRecord>,
        timestamp: String,
    },
    Complete {
        workflow_id: String,
        workflow: WorkflowRecord,
        phases: Vec<PhaseRecord>,
        timestamp: String,
    },
    Fail {
        workflow_id: String,
        workflow: WorkflowRecord,
        phases: Vec<PhaseRecord>,
        timestamp: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Cancel {
        workflow_id: String,
        workflow: WorkflowRecord,
        phases: Vec<PhaseRecord>,
        timestamp: String,
    },
}

/// Control frames exchanged on any subscriber socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlFrame {
    /// Liveness probe, sent by either side.
    Ping,
    /// Reply to a client ping.
    Pong { timestamp: String },
    /// Out-of-band protocol error.
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{now_rfc3339, EntityStatus};

    fn sample_task() -> TaskRecord {
        TaskRecord {
            task_id: "TASK-A".into(),
            status: EntityStatus::InProgress,
            progress: Some(50),
            created_at: now_rfc3339(),
            updated_at: now_rfc3339(),
            completed_at: None,
            failed_at: None,
            canceled_at: None,
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn test_task_event_tags() {
        let event = TaskEvent::Progress {
            task: sample_task(),
            progress: 50,
            timestamp: now_rfc3339(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "progress");
        assert_eq!(value["progress"], 50);
        assert_eq!(value["task"]["taskId"], "TASK-A");
    }

    #[test]
    fn test_workflow_event_kebab_tags() {
        let workflow = WorkflowRecord {
            workflow_id: "WF-1".into(),
            status: EntityStatus::InProgress,
            overall_progress: 65,
            expected_phase_count: 3,
            completed_phase_count: 1,
            active_phase_key: Some("t".into()),
            created_at: now_rfc3339(),
            updated_at: now_rfc3339(),
            completed_at: None,
            failed_at: None,
            canceled_at: None,
            metadata: serde_json::json!({}),
        };
        let event = WorkflowEvent::PhaseProgress {
            workflow_id: "WF-1".into(),
            phase: "t".into(),
            progress: 50,
            overall_progress: 65,
            workflow,
            phases: vec![],
            timestamp: now_rfc3339(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "phase-progress");
        assert_eq!(value["overallProgress"], 65);
        assert_eq!(value["workflowId"], "WF-1");
    }

    #[test]
    fn test_control_frames() {
        let ping: ControlFrame = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(ping, ControlFrame::Ping));

        let pong = ControlFrame::Pong {
            timestamp: now_rfc3339(),
        };
        let value = serde_json::to_value(&pong).unwrap();
        assert_eq!(value["type"], "pong");
    }
}
