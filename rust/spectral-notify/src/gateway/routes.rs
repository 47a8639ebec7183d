//! Service-level routes: health and API info.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::AppState;

/// Service routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/info", get(get_api_info))
}

/// Health response.
#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub version: &'static str,
    pub tasks: i64,
    pub workflows: i64,
}

/// Liveness plus registered entity counts.
async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    match state.directory.entity_counts().await {
        Ok((tasks, workflows)) => (
            StatusCode::OK,
            Json(Health {
                status: "ok",
                version: env!("CARGO_PKG_VERSION"),
                tasks,
                workflows,
            }),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Health check failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(Health {
                    status: "degraded",
                    version: env!("CARGO_PKG_VERSION"),
                    tasks: -1,
                    workflows: -1,
                }),
            )
                .into_response()
        }
    }
}

/// API info response.
#[derive(Debug, Serialize)]
pub struct ApiInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub endpoints: Vec<EndpointInfo>,
}

/// Endpoint information.
#[derive(Debug, Serialize)]
pub struct EndpointInfo {
    pub path: String,
    pub method: String,
    pub description: String,
}

/// Get API information.
async fn get_api_info() -> impl IntoResponse {
    let entry = |path: &str, method: &str, description: &str| EndpointInfo {
        path: path.to_string(),
        method: method.to_string(),
        description: description.to_string(),
    };

    let info = ApiInfo {
        name: "SpectralNotify".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        description: "Real-time progress notification broker for long-running work".to_string(),
        endpoints: vec![
            entry("/tasks/create", "POST", "Create a task"),
            entry("/tasks/updateProgress", "POST", "Report task progress"),
            entry("/tasks/appendEvent", "POST", "Append a task history event"),
            entry("/tasks/complete", "POST", "Complete a task"),
            entry("/tasks/fail", "POST", "Fail a task"),
            entry("/tasks/cancel", "POST", "Cancel a task"),
            entry("/tasks/getById", "POST", "Task snapshot"),
            entry("/tasks/getAll", "POST", "All task snapshots"),
            entry("/tasks/getHistory", "POST", "Newest-first task history"),
            entry("/workflows/create", "POST", "Create a workflow with phases"),
            entry(
                "/workflows/updatePhaseProgress",
                "POST",
                "Report phase progress",
            ),
            entry("/workflows/completePhase", "POST", "Complete a phase"),
            entry("/workflows/complete", "POST", "Complete a workflow"),
            entry("/workflows/fail", "POST", "Fail a workflow"),
            entry("/workflows/cancel", "POST", "Cancel a workflow"),
            entry("/workflows/getPhases", "POST", "Ordered phase list"),
            entry("/ws/{kind}/{id}", "GET", "Subscribe to live events"),
        ],
    };

    (StatusCode::OK, Json(info))
}
