//! Task REST endpoints.

use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Deserialize;

use crate::domain::{validate_entity_id, validate_progress, TaskEventType};
use crate::error::ApiError;
use crate::AppState;

use super::idempotency::{run_idempotent, run_idempotent_compound};
use super::{auth, clamp_history_limit, parse_body};

/// Read-only task routes.
pub fn read_router() -> Router<AppState> {
    Router::new()
        .route("/tasks/getById", post(get_by_id))
        .route("/tasks/getAll", post(get_all))
        .route("/tasks/getHistory", post(get_history))
}

/// Mutating task routes; wrapped in auth + rate limit + timeout layers.
pub fn write_router() -> Router<AppState> {
    Router::new()
        .route("/tasks/create", post(create))
        .route("/tasks/updateProgress", post(update_progress))
        .route("/tasks/appendEvent", post(append_event))
        .route("/tasks/complete", post(complete))
        .route("/tasks/fail", post(fail))
        .route("/tasks/cancel", post(cancel))
        .route("/tasks/delete", post(delete))
        .route("/tasks/deleteAll", post(delete_all))
}

#[derive(Debug, Deserialize)]
struct CreateTaskRequest {
    id: String,
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
struct UpdateProgressRequest {
    task_id: String,
    progress: i64,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendEventRequest {
    task_id: String,
    #[serde(rename = "type")]
    event_type: String,
    message: String,
    #[serde(default)]
    progress: Option<i64>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskIdRequest {
    task_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FailRequest {
    task_id: String,
    error: String,
}

async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, ApiError> {
    let req: CreateTaskRequest = parse_body(&body)?;
    validate_entity_id(&req.id)?;
    let metadata = req.metadata.unwrap_or_else(|| serde_json::json!({}));
    let created_by = auth::caller_identity(&headers);

    let directory = state.directory.clone();
    run_idempotent(&state, "/tasks/create", &headers, &body, |idem| async move {
        directory
            .task(&req.id)
            .create(metadata, &created_by, Some(idem))
            .await
    })
    .await
}

async fn update_progress(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, ApiError> {
    let req: UpdateProgressRequest = parse_body(&body)?;
    validate_progress(req.progress)?;

    let directory = state.directory.clone();
    run_idempotent(
        &state,
        "/tasks/updateProgress",
        &headers,
        &body,
        |idem| async move {
            directory
                .task(&req.task_id)
                .update_progress(req.progress, req.message, Some(idem))
                .await
        },
    )
    .await
}

async fn append_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, ApiError> {
    let req: AppendEventRequest = parse_body(&body)?;
    let event_type = TaskEventType::parse(&req.event_type)?;
    if let Some(progress) = req.progress {
        validate_progress(progress)?;
    }

    let directory = state.directory.clone();
    run_idempotent(
        &state,
        "/tasks/appendEvent",
        &headers,
        &body,
        |idem| async move {
            directory
                .task(&req.task_id)
                .append_event(event_type, req.message, req.progress, req.metadata, Some(idem))
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
    let req: TaskIdRequest = parse_body(&body)?;
    let directory = state.directory.clone();
    run_idempotent(&state, "/tasks/complete", &headers, &body, |idem| async move {
        directory.task(&req.task_id).complete(Some(idem)).await
    })
    .await
}

async fn fail(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, ApiError> {
    let req: FailRequest = parse_body(&body)?;
    let directory = state.directory.clone();
    run_idempotent(&state, "/tasks/fail", &headers, &body, |idem| async move {
        directory.task(&req.task_id).fail(req.error, Some(idem)).await
    })
    .await
}

async fn cancel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, ApiError> {
    let req: TaskIdRequest = parse_body(&body)?;
    let directory = state.directory.clone();
    run_idempotent(&state, "/tasks/cancel", &headers, &body, |idem| async move {
        directory.task(&req.task_id).cancel(Some(idem)).await
    })
    .await
}

async fn delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, ApiError> {
    let req: EntityIdRequest = parse_body(&body)?;
    let directory = state.directory.clone();
    run_idempotent(&state, "/tasks/delete", &headers, &body, |idem| async move {
        directory
            .delete(crate::domain::EntityKind::Task, &req.id, Some(idem))
            .await
    })
    .await
}

async fn delete_all(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, ApiError> {
    let directory = state.directory.clone();
    run_idempotent_compound(&state, "/tasks/deleteAll", &headers, &body, || async move {
        directory.delete_all(crate::domain::EntityKind::Task).await
    })
    .await
}

async fn get_by_id(
    State(state): State<AppState>,
    Json(req): Json<EntityIdRequest>,
) -> Result<Response, ApiError> {
    let record = state.directory.task(&req.id).get().await?;
    Ok(Json(record).into_response())
}

async fn get_all(State(state): State<AppState>) -> Result<Response, ApiError> {
    let snapshots = state.directory.task_snapshots().await?;
    Ok(Json(snapshots).into_response())
}

async fn get_history(
    State(state): State<AppState>,
    Json(req): Json<HistoryRequest>,
) -> Result<Response, ApiError> {
    let limit = clamp_history_limit(req.limit);
    let history = state.directory.task(&req.id).history(limit).await?;
    Ok(Json(history).into_response())
}
