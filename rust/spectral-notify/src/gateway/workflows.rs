//! Workflow REST endpoints.

use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Deserialize;

use crate::domain::{validate_entity_id, validate_weight, PhaseSpec};
use crate::error::ApiError;
use crate::AppState;

use super::idempotency::{run_idempotent, run_idempotent_compound};
use super::{auth, clamp_history_limit, parse_body};

/// Read-only workflow routes.
pub fn read_router() -> Router<AppState> {
    Router::new()
        .route("/workflows/getById", post(get_by_id))
        .route("/workflows/getAll", post(get_all))
        .route("/workflows/getHistory", post(get_history))
        .route("/workflows/getPhases", post(get_phases))
}

/// Mutating workflow routes; wrapped in auth + rate limit + timeout layers.
pub fn write_router() -> Router<AppState> {
    Router::new()
        .route("/workflows/create", post(create))
        .route("/workflows/updatePhaseProgress", post(update_phase_progress))
        .route("/workflows/completePhase", post(complete_phase))
        .route("/workflows/complete", post(complete))
        .route("/workflows/fail", post(fail))
        .route("/workflows/cancel", post(cancel))
        .route("/workflows/delete", post(delete))
        .route("/workflows/deleteAll", post(delete_all))
}

#[derive(Debug, Deserialize)]
struct CreateWorkflowRequest {
    id: String,
    #[serde(default)]
    phases: Vec<PhaseSpec>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct EntityIdRequest {
    id: String,
}

#[derive(Debug, Deserialize)]
struct HistoryRequest {
    id: String,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkflowIdRequest {
    workflow_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PhaseProgressRequest {
    workflow_id: String,
    phase: String,
    progress: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PhaseRequest {
    workflow_id: String,
    phase: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FailRequest {
    workflow_id: String,
    error: String,
}

async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, ApiError> {
    let req: CreateWorkflowRequest = parse_body(&body)?;
    validate_entity_id(&req.id)?;
    for phase in &req.phases {
        if phase.key.is_empty() || phase.key.len() > 128 {
            return Err(ApiError::InvalidInput(format!(
                "phase key must be 1..=128 characters, got {}",
                phase.key.len()
            )));
        }
        if let Some(weight) = phase.weight {
            validate_weight(weight)?;
        }
    }
    let metadata = req.metadata.unwrap_or_else(|| serde_json::json!({}));
    let created_by = auth::caller_identity(&headers);

    let directory = state.directory.clone();
    run_idempotent(
        &state,
        "/workflows/create",
        &headers,
        &body,
        |idem| async move {
            directory
                .workflow(&req.id)
                .create(req.phases, metadata, &created_by, Some(idem))
                .await
        },
    )
    .await
}

async fn update_phase_progress(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, ApiError> {
    let req: PhaseProgressRequest = parse_body(&body)?;
    if !req.progress.is_finite() {
        return Err(ApiError::InvalidInput(
            "progress must be a finite number".to_string(),
        ));
    }

    let directory = state.directory.clone();
    run_idempotent(
        &state,
        "/workflows/updatePhaseProgress",
        &headers,
        &body,
        |idem| async move {
            directory
                .workflow(&req.workflow_id)
                .update_phase_progress(&req.phase, req.progress, Some(idem))
                .await
        },
    )
    .await
}

async fn complete_phase(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, ApiError> {
    let req: PhaseRequest = parse_body(&body)?;
    let directory = state.directory.clone();
    run_idempotent(
        &state,
        "/workflows/completePhase",
        &headers,
        &body,
        |idem| async move {
            directory
                .workflow(&req.workflow_id)
                .complete_phase(&req.phase, Some(idem))
                .await
        },
    )
    .await
}

async fn complete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, ApiError> {
    let req: WorkflowIdRequest = parse_body(&body)?;
    let strict = state.config.workflow.strict_complete;
    let directory = state.directory.clone();
    run_idempotent(
        &state,
        "/workflows/complete",
        &headers,
        &body,
        |idem| async move {
            directory
                .workflow(&req.workflow_id)
                .complete(strict, Some(idem))
                .await
        },
    )
    .await
}

async fn fail(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, ApiError> {
    let req: FailRequest = parse_body(&body)?;
    let directory = state.directory.clone();
    run_idempotent(&state, "/workflows/fail", &headers, &body, |idem| async move {
        directory
            .workflow(&req.workflow_id)
            .fail(req.error, Some(idem))
            .await
    })
    .await
}

async fn cancel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, ApiError> {
    let req: WorkflowIdRequest = parse_body(&body)?;
    let directory = state.directory.clone();
    run_idempotent(
        &state,
        "/workflows/cancel",
        &headers,
        &body,
        |idem| async move {
            directory.workflow(&req.workflow_id).cancel(Some(idem)).await
        },
    )
    .await
}

async fn delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, ApiError> {
    let req: EntityIdRequest = parse_body(&body)?;
    let directory = state.directory.clone();
    run_idempotent(
        &state,
        "/workflows/delete",
        &headers,
        &body,
        |idem| async move {
            directory
                .delete(crate::domain::EntityKind::Workflow, &req.id, Some(idem))
                .await
        },
    )
    .await
}

async fn delete_all(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, ApiError> {
    let directory = state.directory.clone();
    run_idempotent_compound(
        &state,
        "/workflows/deleteAll",
        &headers,
        &body,
        || async move {
            directory
                .delete_all(crate::domain::EntityKind::Workflow)
                .await
        },
    )
    .await
}

async fn get_by_id(
    State(state): State<AppState>,
    Json(req): Json<EntityIdRequest>,
) -> Result<Response, ApiError> {
    let record = state.directory.workflow(&req.id).get().await?;
    Ok(Json(record).into_response())
}

async fn get_all(State(state): State<AppState>) -> Result<Response, ApiError> {
    let snapshots = state.directory.workflow_snapshots().await?;
    Ok(Json(snapshots).into_response())
}

async fn get_history(
    State(state): State<AppState>,
    Json(req): Json<HistoryRequest>,
) -> Result<Response, ApiError> {
    let limit = clamp_history_limit(req.limit);
    let history = state.directory.workflow(&req.id).history(limit).await?;
    Ok(Json(history).into_response())
}

async fn get_phases(
    State(state): State<AppState>,
    Json(req): Json<WorkflowIdRequest>,
) -> Result<Response, ApiError> {
    let phases = state.directory.workflow(&req.workflow_id).phases().await?;
    Ok(Json(phases).into_response())
}
