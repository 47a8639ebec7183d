//! Core domain model: entity kinds, statuses, metadata records, and
//! history rows.
//!
//! All timestamps are RFC-3339 UTC strings; progress values are integers
//! in `0..=100`. Wire field names are camelCase.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Entity kind routed by the broker front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// Single-step job.
    Task,
    /// Multi-phase job.
    Workflow,
}

impl EntityKind {
    /// Convert kind to its wire string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Workflow => "workflow",
        }
    }

    /// Parse a kind from a route segment.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "task" => Some(Self::Task),
            "workflow" => Some(Self::Workflow),
            _ => None,
        }
    }
}

/// Lifecycle status shared by tasks, workflows, and phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityStatus {
    Pending,
    InProgress,
    Success,
    Failed,
    Canceled,
}

impl EntityStatus {
    /// Convert status to string for database storage.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in-progress",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    /// Parse status from a database string.
    pub fn parse(s: &str) -> Result<Self, ApiError> {
        match s {
            "pending" => Ok(Self::Pending),
            "in-progress" => Ok(Self::InProgress),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "canceled" => Ok(Self::Canceled),
            _ => Err(ApiError::Internal(anyhow::anyhow!(
                "invalid status in store: {s}"
            ))),
        }
    }

    /// `success`, `failed`, and `canceled` have no outgoing transitions.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Canceled)
    }
}

/// History event types recorded for tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskEventType {
    Log,
    Progress,
    Error,
    Success,
    Cancel,
}

impl TaskEventType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Progress => "progress",
            Self::Error => "error",
            Self::Success => "success",
            Self::Cancel => "cancel",
        }
    }

    /// Parse a client-supplied event type.
    pub fn parse(s: &str) -> Result<Self, ApiError> {
        match s {
            "log" => Ok(Self::Log),
            "progress" => Ok(Self::Progress),
            "error" => Ok(Self::Error),
            "success" => Ok(Self::Success),
            "cancel" => Ok(Self::Cancel),
            _ => Err(ApiError::InvalidInput(format!("unknown event type: {s}"))),
        }
    }
}

/// History event types recorded for workflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowEventType {
    Log,
    PhaseProgress,
    WorkflowProgress,
    Error,
    Success,
    Cancel,
}

impl WorkflowEventType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::PhaseProgress => "phase-progress",
            Self::WorkflowProgress => "workflow-progress",
            Self::Error => "error",
            Self::Success => "success",
            Self::Cancel => "cancel",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ApiError> {
        match s {
            "log" => Ok(Self::Log),
            "phase-progress" => Ok(Self::PhaseProgress),
            "workflow-progress" => Ok(Self::WorkflowProgress),
            "error" => Ok(Self::Error),
            "success" => Ok(Self::Success),
            "cancel" => Ok(Self::Cancel),
            _ => Err(ApiError::InvalidInput(format!("unknown event type: {s}"))),
        }
    }
}

/// Task metadata snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    /// Unique task identifier.
    pub task_id: String,
    /// Current lifecycle status.
    pub status: EntityStatus,
    /// Last reported progress, absent until the first update.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canceled_at: Option<String>,
    /// Opaque caller-supplied blob (author, origin, purpose, tags).
    pub metadata: serde_json::Value,
}

/// Workflow metadata snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRecord {
    pub workflow_id: String,
    pub status: EntityStatus,
    /// Weighted average of phase progress, rounded to an integer.
    pub overall_progress: i64,
    pub expected_phase_count: i64,
    pub completed_phase_count: i64,
    /// Lowest-order non-terminal phase, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_phase_key: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canceled_at: Option<String>,
    pub metadata: serde_json::Value,
}

/// A named weighted sub-step of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseRecord {
    pub phase_key: String,
    pub label: String,
    pub weight: f64,
    pub status: EntityStatus,
    pub progress: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    /// Insertion index, preserved across reads.
    pub order: i64,
}

/// Phase description accepted on workflow create.
#[derive(Debug, Clone, Deserialize)]
pub struct PhaseSpec {
    pub key: String,
    /// Defaults to the key when absent.
    #[serde(default)]
    pub label: Option<String>,
    /// Defaults to 1.0 when absent.
    #[serde(default)]
    pub weight: Option<f64>,
}

/// Append-only task history row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskHistoryEntry {
    pub id: i64,
    pub task_id: String,
    pub event_type: TaskEventType,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<i64>,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Append-only workflow history row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowHistoryEntry {
    pub id: i64,
    pub workflow_id: String,
    pub event_type: WorkflowEventType,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<i64>,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Registry row: one per created entity, per kind.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryRow {
    pub id: String,
    pub created_at: String,
    pub created_by: String,
}

/// Current UTC time as an RFC-3339 string with millisecond precision.
///
/// The fixed `Z`-suffixed millisecond format keeps timestamps
/// lexicographically ordered, which `monotonic` relies on.
#[must_use]
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Clamp a fresh timestamp so `updatedAt` never moves backwards.
#[must_use]
pub fn monotonic(now: String, prev: &str) -> String {
    if now.as_str() < prev {
        prev.to_string()
    } else {
        now
    }
}

/// Validate an entity ID: 1..=128 printable ASCII characters.
pub fn validate_entity_id(id: &str) -> Result<(), ApiError> {
    if id.is_empty() || id.len() > 128 {
        return Err(ApiError::InvalidInput(format!(
            "entity id must be 1..=128 characters, got {}",
            id.len()
        )));
    }
    if !id.bytes().all(|b| (0x20..=0x7e).contains(&b)) {
        return Err(ApiError::InvalidInput(
            "entity id must be printable ASCII".to_string(),
        ));
    }
    Ok(())
}

/// Validate task-level progress; out-of-range values are rejected.
pub fn validate_progress(progress: i64) -> Result<(), ApiError> {
    if !(0..=100).contains(&progress) {
        return Err(ApiError::InvalidInput(format!(
            "progress must be within 0..=100, got {progress}"
        )));
    }
    Ok(())
}

/// Clamp phase-level progress into `[0, 100]` and round to an integer.
#[must_use]
pub fn clamp_progress(progress: f64) -> i64 {
    if progress.is_nan() {
        return 0;
    }
    #[allow(
        clippy::cast_possible_truncation,
        reason = "value is clamped to [0, 100] before the cast"
    )]
    let clamped = progress.clamp(0.0, 100.0).round() as i64;
    clamped
}

/// Validate a phase weight: finite and non-negative.
pub fn validate_weight(weight: f64) -> Result<(), ApiError> {
    if !weight.is_finite() || weight < 0.0 {
        return Err(ApiError::InvalidInput(format!(
            "phase weight must be a finite number >= 0, got {weight}"
        )));
    }
    Ok(())
}
