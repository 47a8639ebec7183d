//! Workflow state, phase, and history storage.
//!
//! Phase rows are mutated together with the workflow metadata row inside
//! a single transaction; derived values (`overallProgress`,
//! `completedPhaseCount`, `activePhaseKey`) are recomputed on every
//! phase change.

use std::collections::HashSet;

use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};

use crate::domain::{
    clamp_progress, monotonic, now_rfc3339, EntityKind, EntityStatus, PhaseRecord, PhaseSpec,
    WorkflowEventType, WorkflowHistoryEntry, WorkflowRecord,
};
use crate::error::ApiError;

use super::idempotency::{record_response, IdemWrite};
use super::{registry, Database};

/// Outcome of a mutating workflow operation.
#[derive(Debug, Clone)]
pub struct WorkflowWrite {
    /// Committed snapshot after the write.
    pub record: WorkflowRecord,
    /// Phase snapshots in insertion order.
    pub phases: Vec<PhaseRecord>,
    /// Appended history row; `None` for identity re-applies.
    pub history: Option<WorkflowHistoryEntry>,
    /// REST response body, as cached under the idempotency key.
    pub response: serde_json::Value,
}

/// Workflow metadata, phase, and history store.
#[derive(Debug, Clone)]
pub struct WorkflowStore {
    db: Database,
}

impl WorkflowStore {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a workflow with its ordered phase list and register it.
    pub async fn create(
        &self,
        workflow_id: &str,
        phases: Vec<PhaseSpec>,
        metadata: serde_json::Value,
        created_by: &str,
        idem: Option<IdemWrite>,
    ) -> Result<(WorkflowRecord, Vec<PhaseRecord>, serde_json::Value), ApiError> {
        let workflow_id = workflow_id.to_string();
        let created_by = created_by.to_string();

        self.db
            .run_blocking(move |mut conn| {
                let mut seen = HashSet::new();
                for phase in &phases {
                    if !seen.insert(phase.key.as_str()) {
                        return Err(ApiError::DuplicatePhase(format!(
                            "duplicate phase key: {}",
                            phase.key
                        )));
                    }
                }

                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let now = now_rfc3339();
                let metadata_json = metadata.to_string();
                let phase_count = phases.len() as i64;
                let active_phase_key = phases.first().map(|p| p.key.clone());

                match tx.execute(
                    r"
                    INSERT INTO workflow_metadata
                        (workflow_id, status, overall_progress, expected_phase_count,
                         completed_phase_count, active_phase_key, created_at, updated_at, metadata)
                    VALUES (?1, 'pending', 0, ?2, 0, ?3, ?4, ?4, ?5)
                    ",
                    params![&workflow_id, phase_count, &active_phase_key, &now, &metadata_json],
                ) {
                    Ok(_) => {}
                    Err(rusqlite::Error::SqliteFailure(e, _))
                        if e.code == ErrorCode::ConstraintViolation =>
                    {
                        return Err(ApiError::DuplicateEntity(format!(
                            "workflow {workflow_id} already exists"
                        )));
                    }
                    Err(e) => return Err(e.into()),
                }

                let mut rows = Vec::with_capacity(phases.len());
                for (order, phase) in phases.iter().enumerate() {
                    let label = phase.label.clone().unwrap_or_else(|| phase.key.clone());
                    let weight = phase.weight.unwrap_or(1.0);
                    tx.execute(
                        r"
                        INSERT INTO workflow_phase
                            (workflow_id, phase_key, label, weight, status, progress, phase_order)
                        VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5)
                        ",
                        params![&workflow_id, &phase.key, &label, weight, order as i64],
                    )?;
                    rows.push(PhaseRecord {
                        phase_key: phase.key.clone(),
                        label,
                        weight,
                        status: EntityStatus::Pending,
                        progress: 0,
                        started_at: None,
                        updated_at: None,
                        completed_at: None,
                        order: order as i64,
                    });
                }

                registry::insert(&tx, EntityKind::Workflow, &workflow_id, &created_by, &now)?;

                let record = WorkflowRecord {
                    workflow_id,
                    status: EntityStatus::Pending,
                    overall_progress: 0,
                    expected_phase_count: phase_count,
                    completed_phase_count: 0,
                    active_phase_key,
                    created_at: now.clone(),
                    updated_at: now,
                    completed_at: None,
                    failed_at: None,
                    canceled_at: None,
                    metadata,
                };
                let response = workflow_response(&record, &rows)?;

                if let Some(idem) = &idem {
                    record_response(&tx, idem, 200, &response)?;
                }
                tx.commit()?;

                Ok((record, rows, response))
            })
            .await
    }

    /// Report phase progress; clamped to [0, 100].
    ///
    /// Setting 100 does not complete the phase; only `complete_phase`
    /// transitions it to `success`.
    pub async fn update_phase_progress(
        &self,
        workflow_id: &str,
        phase_key: &str,
        raw_progress: f64,
        idem: Option<IdemWrite>,
    ) -> Result<WorkflowWrite, ApiError> {
        let workflow_id = workflow_id.to_string();
        let phase_key = phase_key.to_string();

        self.db
            .run_blocking(move |mut conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let mut record = require_workflow(&tx, &workflow_id)?;
                if record.status.is_terminal() {
                    return Err(terminal(&record));
                }

                let mut phases = load_phases(&tx, &workflow_id)?;
                let idx = find_phase(&phases, &workflow_id, &phase_key)?;
                if phases[idx].status.is_terminal() {
                    return Err(terminal_phase(&phases[idx]));
                }

                let now = monotonic(now_rfc3339(), &record.updated_at);
                let progress = clamp_progress(raw_progress);

                let phase = &mut phases[idx];
                if phase.status == EntityStatus::Pending {
                    phase.status = EntityStatus::InProgress;
                    phase.started_at = Some(now.clone());
                }
                phase.progress = progress;
                phase.updated_at = Some(now.clone());

                tx.execute(
                    r"
                    UPDATE workflow_phase
                    SET status = ?1, progress = ?2, started_at = ?3, updated_at = ?4
                    WHERE workflow_id = ?5 AND phase_key = ?6
                    ",
                    params![
                        phase.status.as_str(),
                        progress,
                        phase.started_at,
                        &now,
                        &workflow_id,
                        &phase_key
                    ],
                )?;

                if record.status == EntityStatus::Pending {
                    record.status = EntityStatus::InProgress;
                }
                finish_phase_mutation(&tx, &mut record, &phases, &now)?;

                let history = append_history(
                    &tx,
                    &workflow_id,
                    WorkflowEventType::PhaseProgress,
                    &format!("phase \"{phase_key}\" progress {progress}%"),
                    Some(&phase_key),
                    Some(progress),
                    &now,
                )?;

                commit_write(tx, record, phases, Some(history), idem.as_ref())
            })
            .await
    }

    /// Transition a phase to `success` with progress 100.
    pub async fn complete_phase(
        &self,
        workflow_id: &str,
        phase_key: &str,
        idem: Option<IdemWrite>,
    ) -> Result<WorkflowWrite, ApiError> {
        let workflow_id = workflow_id.to_string();
        let phase_key = phase_key.to_string();

        self.db
            .run_blocking(move |mut conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let mut record = require_workflow(&tx, &workflow_id)?;
                if record.status.is_terminal() {
                    return Err(terminal(&record));
                }

                let mut phases = load_phases(&tx, &workflow_id)?;
                let idx = find_phase(&phases, &workflow_id, &phase_key)?;
                if phases[idx].status.is_terminal() {
                    return Err(terminal_phase(&phases[idx]));
                }

                let now = monotonic(now_rfc3339(), &record.updated_at);

                let phase = &mut phases[idx];
                if phase.started_at.is_none() {
                    phase.started_at = Some(now.clone());
                }
                phase.status = EntityStatus::Success;
                phase.progress = 100;
                phase.updated_at = Some(now.clone());
                phase.completed_at = Some(now.clone());

                tx.execute(
                    r"
                    UPDATE workflow_phase
                    SET status = 'success', progress = 100, started_at = ?1, updated_at = ?2, completed_at = ?2
                    WHERE workflow_id = ?3 AND phase_key = ?4
                    ",
                    params![phase.started_at, &now, &workflow_id, &phase_key],
                )?;

                if record.status == EntityStatus::Pending {
                    record.status = EntityStatus::InProgress;
                }
                finish_phase_mutation(&tx, &mut record, &phases, &now)?;

                let history = append_history(
                    &tx,
                    &workflow_id,
                    WorkflowEventType::WorkflowProgress,
                    &format!("phase \"{phase_key}\" completed"),
                    Some(&phase_key),
                    Some(100),
                    &now,
                )?;

                commit_write(tx, record, phases, Some(history), idem.as_ref())
            })
            .await
    }

    /// Transition the workflow to `success`.
    ///
    /// With `strict` false, non-terminal phases are auto-completed to
    /// `success` first; with `strict` true the call is rejected while any
    /// phase is non-terminal.
    pub async fn complete(
        &self,
        workflow_id: &str,
        strict: bool,
        idem: Option<IdemWrite>,
    ) -> Result<WorkflowWrite, ApiError> {
        let workflow_id = workflow_id.to_string();

        self.db
            .run_blocking(move |mut conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let mut record = require_workflow(&tx, &workflow_id)?;
                let mut phases = load_phases(&tx, &workflow_id)?;

                if record.status.is_terminal() {
                    if record.status == EntityStatus::Success {
                        return identity(tx, record, phases, idem.as_ref());
                    }
                    return Err(terminal(&record));
                }

                let unfinished: Vec<String> = phases
                    .iter()
                    .filter(|p| !p.status.is_terminal())
                    .map(|p| p.phase_key.clone())
                    .collect();
                if strict && !unfinished.is_empty() {
                    return Err(ApiError::InvalidInput(format!(
                        "workflow {workflow_id} has non-terminal phases: {}",
                        unfinished.join(", ")
                    )));
                }

                let now = monotonic(now_rfc3339(), &record.updated_at);

                for phase in phases.iter_mut().filter(|p| !p.status.is_terminal()) {
                    if phase.started_at.is_none() {
                        phase.started_at = Some(now.clone());
                    }
                    phase.status = EntityStatus::Success;
                    phase.progress = 100;
                    phase.updated_at = Some(now.clone());
                    phase.completed_at = Some(now.clone());
                    tx.execute(
                        r"
                        UPDATE workflow_phase
                        SET status = 'success', progress = 100, started_at = ?1, updated_at = ?2, completed_at = ?2
                        WHERE workflow_id = ?3 AND phase_key = ?4
                        ",
                        params![phase.started_at, &now, &workflow_id, &phase.phase_key],
                    )?;
                }

                record.status = EntityStatus::Success;
                record.completed_at = Some(now.clone());
                finish_phase_mutation(&tx, &mut record, &phases, &now)?;

                let history = append_history(
                    &tx,
                    &workflow_id,
                    WorkflowEventType::Success,
                    "workflow completed",
                    None,
                    None,
                    &now,
                )?;

                commit_write(tx, record, phases, Some(history), idem.as_ref())
            })
            .await
    }

    /// Transition the workflow to `failed`, recording the error.
    pub async fn fail(
        &self,
        workflow_id: &str,
        error: String,
        idem: Option<IdemWrite>,
    ) -> Result<WorkflowWrite, ApiError> {
        self.terminal_transition(
            workflow_id,
            EntityStatus::Failed,
            WorkflowEventType::Error,
            error,
            idem,
        )
        .await
    }

    /// Transition the workflow to `canceled`.
    pub async fn cancel(
        &self,
        workflow_id: &str,
        idem: Option<IdemWrite>,
    ) -> Result<WorkflowWrite, ApiError> {
        self.terminal_transition(
            workflow_id,
            EntityStatus::Canceled,
            WorkflowEventType::Cancel,
            "workflow canceled".to_string(),
            idem,
        )
        .await
    }

    async fn terminal_transition(
        &self,
        workflow_id: &str,
        target: EntityStatus,
        event_type: WorkflowEventType,
        message: String,
        idem: Option<IdemWrite>,
    ) -> Result<WorkflowWrite, ApiError> {
        let workflow_id = workflow_id.to_string();

        self.db
            .run_blocking(move |mut conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let mut record = require_workflow(&tx, &workflow_id)?;
                let phases = load_phases(&tx, &workflow_id)?;

                if record.status.is_terminal() {
                    if record.status == target {
                        // fail/cancel responses carry the bare workflow snapshot.
                        let response = serde_json::to_value(&record)?;
                        if let Some(idem) = &idem {
                            record_response(&tx, idem, 200, &response)?;
                        }
                        tx.commit()?;
                        return Ok(WorkflowWrite {
                            record,
                            phases,
                            history: None,
                            response,
                        });
                    }
                    return Err(terminal(&record));
                }

                let now = monotonic(now_rfc3339(), &record.updated_at);
                record.status = target;
                record.updated_at = now.clone();
                match target {
                    EntityStatus::Failed => record.failed_at = Some(now.clone()),
                    EntityStatus::Canceled => record.canceled_at = Some(now.clone()),
                    _ => unreachable!(),
                }

                tx.execute(
                    r"
                    UPDATE workflow_metadata
                    SET status = ?1, updated_at = ?2, failed_at = ?3, canceled_at = ?4
                    WHERE workflow_id = ?5
                    ",
                    params![
                        record.status.as_str(),
                        &now,
                        record.failed_at,
                        record.canceled_at,
                        &workflow_id
                    ],
                )?;

                let history =
                    append_history(&tx, &workflow_id, event_type, &message, None, None, &now)?;

                let response = serde_json::to_value(&record)?;
                if let Some(idem) = &idem {
                    record_response(&tx, idem, 200, &response)?;
                }
                tx.commit()?;

                Ok(WorkflowWrite {
                    record,
                    phases,
                    history: Some(history),
                    response,
                })
            })
            .await
    }

    /// Read the committed snapshot without mutating.
    pub async fn get(&self, workflow_id: &str) -> Result<Option<WorkflowRecord>, ApiError> {
        let workflow_id = workflow_id.to_string();
        self.db
            .run_blocking(move |conn| read_workflow(&conn, &workflow_id))
            .await
    }

    /// Ordered phase snapshots.
    pub async fn phases(&self, workflow_id: &str) -> Result<Vec<PhaseRecord>, ApiError> {
        let workflow_id = workflow_id.to_string();
        self.db
            .run_blocking(move |conn| {
                require_workflow(&conn, &workflow_id)?;
                load_phases(&conn, &workflow_id)
            })
            .await
    }

    /// Newest-first history, at most `limit` rows.
    pub async fn history(
        &self,
        workflow_id: &str,
        limit: usize,
    ) -> Result<Vec<WorkflowHistoryEntry>, ApiError> {
        let workflow_id = workflow_id.to_string();

        self.db
            .run_blocking(move |conn| {
                require_workflow(&conn, &workflow_id)?;

                let mut stmt = conn.prepare(
                    r"
                    SELECT id, event_type, message, phase_key, progress, timestamp, metadata
                    FROM workflow_history
                    WHERE workflow_id = ?1
                    ORDER BY id DESC
                    LIMIT ?2
                    ",
                )?;
                #[allow(clippy::type_complexity, reason = "raw row tuple before conversion")]
                let rows: Vec<(
                    i64,
                    String,
                    String,
                    Option<String>,
                    Option<i64>,
                    String,
                    Option<String>,
                )> = stmt
                    .query_map(params![&workflow_id, limit as i64], |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                            row.get(6)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                rows.into_iter()
                    .map(
                        |(id, event_type, message, phase_key, progress, timestamp, metadata)| {
                            Ok(WorkflowHistoryEntry {
                                id,
                                workflow_id: workflow_id.clone(),
                                event_type: WorkflowEventType::parse(&event_type)?,
                                message,
                                phase_key,
                                progress,
                                timestamp,
                                metadata: metadata
                                    .map(|m| serde_json::from_str(&m))
                                    .transpose()?,
                            })
                        },
                    )
                    .collect()
            })
            .await
    }

    /// Tear down the workflow: metadata, phases, history, registry row.
    pub async fn delete(
        &self,
        workflow_id: &str,
        idem: Option<IdemWrite>,
    ) -> Result<serde_json::Value, ApiError> {
        let workflow_id = workflow_id.to_string();

        self.db
            .run_blocking(move |mut conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                require_workflow(&tx, &workflow_id)?;

                tx.execute(
                    "DELETE FROM workflow_history WHERE workflow_id = ?1",
                    params![&workflow_id],
                )?;
                tx.execute(
                    "DELETE FROM workflow_phase WHERE workflow_id = ?1",
                    params![&workflow_id],
                )?;
                tx.execute(
                    "DELETE FROM workflow_metadata WHERE workflow_id = ?1",
                    params![&workflow_id],
                )?;
                registry::remove(&tx, EntityKind::Workflow, &workflow_id)?;

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

/// Weighted average of phase progress, rounded to an integer.
///
/// With no phases or zero total weight the value is 0 until every phase
/// is terminal-success (or, for a phase-less workflow, until it succeeds).
fn overall_progress(phases: &[PhaseRecord], status: EntityStatus) -> i64 {
    let total: f64 = phases.iter().map(|p| p.weight).sum();
    if phases.is_empty() {
        return if status == EntityStatus::Success { 100 } else { 0 };
    }
    if total <= 0.0 {
        let all_success = phases.iter().all(|p| p.status == EntityStatus::Success);
        return if all_success { 100 } else { 0 };
    }

    let weighted: f64 = phases
        .iter()
        .map(|p| p.progress as f64 * p.weight)
        .sum();
    #[allow(
        clippy::cast_possible_truncation,
        reason = "weighted average of values in [0, 100] always fits"
    )]
    let rounded = (weighted / total).round() as i64;
    rounded
}

/// Recompute derived workflow values and persist the metadata row.
fn finish_phase_mutation(
    conn: &Connection,
    record: &mut WorkflowRecord,
    phases: &[PhaseRecord],
    now: &str,
) -> Result<(), ApiError> {
    record.completed_phase_count = phases
        .iter()
        .filter(|p| p.status == EntityStatus::Success)
        .count() as i64;
    record.active_phase_key = phases
        .iter()
        .find(|p| !p.status.is_terminal())
        .map(|p| p.phase_key.clone());
    record.overall_progress = overall_progress(phases, record.status);
    record.updated_at = now.to_string();

    conn.execute(
        r"
        UPDATE workflow_metadata
        SET status = ?1, overall_progress = ?2, completed_phase_count = ?3,
            active_phase_key = ?4, updated_at = ?5, completed_at = ?6
        WHERE workflow_id = ?7
        ",
        params![
            record.status.as_str(),
            record.overall_progress,
            record.completed_phase_count,
            record.active_phase_key,
            now,
            record.completed_at,
            record.workflow_id
        ],
    )?;
    Ok(())
}

fn workflow_response(
    record: &WorkflowRecord,
    phases: &[PhaseRecord],
) -> Result<serde_json::Value, ApiError> {
    Ok(serde_json::json!({
        "workflow": serde_json::to_value(record)?,
        "phases": serde_json::to_value(phases)?,
    }))
}

fn terminal(record: &WorkflowRecord) -> ApiError {
    ApiError::TerminalState(format!(
        "workflow {} is {}",
        record.workflow_id,
        record.status.as_str()
    ))
}

fn terminal_phase(phase: &PhaseRecord) -> ApiError {
    ApiError::TerminalState(format!(
        "phase {} is {}",
        phase.phase_key,
        phase.status.as_str()
    ))
}

fn find_phase(
    phases: &[PhaseRecord],
    workflow_id: &str,
    phase_key: &str,
) -> Result<usize, ApiError> {
    phases
        .iter()
        .position(|p| p.phase_key == phase_key)
        .ok_or_else(|| {
            ApiError::NotFound(format!(
                "unknown phase {phase_key} in workflow {workflow_id}"
            ))
        })
}

fn identity(
    tx: rusqlite::Transaction<'_>,
    record: WorkflowRecord,
    phases: Vec<PhaseRecord>,
    idem: Option<&IdemWrite>,
) -> Result<WorkflowWrite, ApiError> {
    let response = workflow_response(&record, &phases)?;
    if let Some(idem) = idem {
        record_response(&tx, idem, 200, &response)?;
    }
    tx.commit()?;
    Ok(WorkflowWrite {
        record,
        phases,
        history: None,
        response,
    })
}

fn commit_write(
    tx: rusqlite::Transaction<'_>,
    record: WorkflowRecord,
    phases: Vec<PhaseRecord>,
    history: Option<WorkflowHistoryEntry>,
    idem: Option<&IdemWrite>,
) -> Result<WorkflowWrite, ApiError> {
    let response = workflow_response(&record, &phases)?;
    if let Some(idem) = idem {
        record_response(&tx, idem, 200, &response)?;
    }
    tx.commit()?;
    Ok(WorkflowWrite {
        record,
        phases,
        history,
        response,
    })
}

fn require_workflow(conn: &Connection, workflow_id: &str) -> Result<WorkflowRecord, ApiError> {
    read_workflow(conn, workflow_id)?
        .ok_or_else(|| ApiError::NotFound(format!("workflow {workflow_id} not found")))
}

fn read_workflow(conn: &Connection, workflow_id: &str) -> Result<Option<WorkflowRecord>, ApiError> {
    type Row = (
        String,
        i64,
        i64,
        i64,
        Option<String>,
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
            SELECT status, overall_progress, expected_phase_count, completed_phase_count,
                   active_phase_key, created_at, updated_at, completed_at, failed_at,
                   canceled_at, metadata
            FROM workflow_metadata
            WHERE workflow_id = ?1
            ",
            params![workflow_id],
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
                    row.get(8)?,
                    row.get(9)?,
                    row.get(10)?,
                ))
            },
        )
        .optional()?;

    match row {
        Some((
            status,
            overall_progress,
            expected_phase_count,
            completed_phase_count,
            active_phase_key,
            created_at,
            updated_at,
            completed_at,
            failed_at,
            canceled_at,
            metadata,
        )) => Ok(Some(WorkflowRecord {
            workflow_id: workflow_id.to_string(),
            status: EntityStatus::parse(&status)?,
            overall_progress,
            expected_phase_count,
            completed_phase_count,
            active_phase_key,
            created_at,
            updated_at,
            completed_at,
            failed_at,
            canceled_at,
            metadata: serde_json::from_str(&metadata)?,
        })),
        None => Ok(None),
    }
}

fn load_phases(conn: &Connection, workflow_id: &str) -> Result<Vec<PhaseRecord>, ApiError> {
    let mut stmt = conn.prepare(
        r"
        SELECT phase_key, label, weight, status, progress, started_at, updated_at, completed_at, phase_order
        FROM workflow_phase
        WHERE workflow_id = ?1
        ORDER BY phase_order
        ",
    )?;
    #[allow(clippy::type_complexity, reason = "raw row tuple before conversion")]
    let rows: Vec<(
        String,
        String,
        f64,
        String,
        i64,
        Option<String>,
        Option<String>,
        Option<String>,
        i64,
    )> = stmt
        .query_map(params![workflow_id], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
                row.get(8)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(
            |(phase_key, label, weight, status, progress, started_at, updated_at, completed_at, order)| {
                Ok(PhaseRecord {
                    phase_key,
                    label,
                    weight,
                    status: EntityStatus::parse(&status)?,
                    progress,
                    started_at,
                    updated_at,
                    completed_at,
                    order,
                })
            },
        )
        .collect()
}
