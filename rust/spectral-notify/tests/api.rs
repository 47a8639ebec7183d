//! REST surface integration tests.

mod common;

use common::TestBroker;
use serde_json::json;

#[tokio::test]
async fn test_task_lifecycle() {
    let broker = TestBroker::spawn().await;

    let created = broker
        .post_ok(
            "/tasks/create",
            json!({"id": "TASK-A", "metadata": {"author": "ci", "purpose": "demo"}}),
        )
        .await;
    assert_eq!(created["task"]["taskId"], "TASK-A");
    assert_eq!(created["task"]["status"], "pending");

    let updated = broker
        .post_ok(
            "/tasks/updateProgress",
            json!({"taskId": "TASK-A", "progress": 50, "message": "half"}),
        )
        .await;
    assert_eq!(updated["status"], "in-progress");
    assert_eq!(updated["progress"], 50);

    let snapshot = broker
        .post_ok("/tasks/getById", json!({"id": "TASK-A"}))
        .await;
    assert_eq!(snapshot["status"], "in-progress");
    assert_eq!(snapshot["progress"], 50);
    assert_eq!(snapshot["metadata"]["author"], "ci");

    let history = broker
        .post_ok("/tasks/getHistory", json!({"id": "TASK-A", "limit": 10}))
        .await;
    let rows = history.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["eventType"], "progress");
    assert_eq!(rows[0]["progress"], 50);
    assert_eq!(rows[0]["message"], "half");
}

#[tokio::test]
async fn test_workflow_overall_progress() {
    let broker = TestBroker::spawn().await;

    broker
        .post_ok(
            "/workflows/create",
            json!({
                "id": "WF-1",
                "phases": [
                    {"key": "d", "weight": 0.4},
                    {"key": "t", "weight": 0.5},
                    {"key": "w", "weight": 0.1},
                ],
            }),
        )
        .await;

    broker
        .post_ok(
            "/workflows/updatePhaseProgress",
            json!({"workflowId": "WF-1", "phase": "d", "progress": 100}),
        )
        .await;
    broker
        .post_ok(
            "/workflows/completePhase",
            json!({"workflowId": "WF-1", "phase": "d"}),
        )
        .await;
    let result = broker
        .post_ok(
            "/workflows/updatePhaseProgress",
            json!({"workflowId": "WF-1", "phase": "t", "progress": 50}),
        )
        .await;

    // round(100*0.4 + 50*0.5 + 0*0.1) = 65
    assert_eq!(result["workflow"]["overallProgress"], 65);
    assert_eq!(result["workflow"]["completedPhaseCount"], 1);
    assert_eq!(result["workflow"]["activePhaseKey"], "t");

    let phases = broker
        .post_ok("/workflows/getPhases", json!({"workflowId": "WF-1"}))
        .await;
    let phases = phases.as_array().unwrap();
    assert_eq!(phases.len(), 3);
    assert_eq!(phases[0]["phaseKey"], "d");
    assert_eq!(phases[0]["status"], "success");
    assert_eq!(phases[1]["progress"], 50);
}

#[tokio::test]
async fn test_idempotent_retry_returns_identical_body() {
    let broker = TestBroker::spawn().await;

    broker
        .post_ok(
            "/workflows/create",
            json!({"id": "WF-1", "phases": [{"key": "d", "weight": 1.0}]}),
        )
        .await;

    let body = json!({"workflowId": "WF-1", "phase": "d"});
    let first = broker
        .post_with_key("/workflows/completePhase", body.clone(), "retry-key-1")
        .await
        .text()
        .await
        .unwrap();
    let second = broker
        .post_with_key("/workflows/completePhase", body, "retry-key-1")
        .await
        .text()
        .await
        .unwrap();

    assert_eq!(first, second);

    // Exactly one phase-completion row despite two POSTs.
    let history = broker
        .post_ok("/workflows/getHistory", json!({"id": "WF-1", "limit": 10}))
        .await;
    assert_eq!(history.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_idempotency_key_conflict_across_endpoints() {
    let broker = TestBroker::spawn().await;

    broker.post_ok("/tasks/create", json!({"id": "TASK-A"})).await;
    broker
        .post_with_key("/tasks/complete", json!({"taskId": "TASK-A"}), "shared-key")
        .await;

    let response = broker
        .post_with_key("/tasks/cancel", json!({"taskId": "TASK-A"}), "shared-key")
        .await;
    assert_eq!(response.status(), reqwest::StatusCode::CONFLICT);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], "IDEMPOTENCY_CONFLICT");
}

#[tokio::test]
async fn test_derived_key_deduplicates_double_post() {
    let broker = TestBroker::spawn().await;

    // No Idempotency-Key header on either call; the derived hash of
    // (path, body) still deduplicates the blind retry.
    let body = json!({"id": "TASK-A", "metadata": {"origin": "ci"}});
    let first = broker.post("/tasks/create", body.clone()).await;
    assert_eq!(first.status(), reqwest::StatusCode::OK);
    let second = broker.post("/tasks/create", body).await;
    assert_eq!(second.status(), reqwest::StatusCode::OK);

    let all = broker.post_ok("/tasks/getAll", json!({})).await;
    assert_eq!(all.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_terminal_task_is_sealed() {
    let broker = TestBroker::spawn().await;

    broker.post_ok("/tasks/create", json!({"id": "TASK-A"})).await;
    broker
        .post_ok("/tasks/complete", json!({"taskId": "TASK-A"}))
        .await;

    let response = broker
        .post(
            "/tasks/updateProgress",
            json!({"taskId": "TASK-A", "progress": 10}),
        )
        .await;
    assert_eq!(response.status(), reqwest::StatusCode::CONFLICT);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], "TERMINAL_STATE");

    // No new history rows after the terminal event.
    let history = broker
        .post_ok("/tasks/getHistory", json!({"id": "TASK-A", "limit": 10}))
        .await;
    assert_eq!(history.as_array().unwrap().len(), 1);
    assert_eq!(history[0]["eventType"], "success");
}

#[tokio::test]
async fn test_writes_require_api_key() {
    let broker = TestBroker::spawn().await;

    let response = broker
        .post_anonymous("/tasks/create", json!({"id": "TASK-A"}))
        .await;
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], "UNAUTHORIZED");

    // Reads stay open.
    let response = broker.post_anonymous("/tasks/getAll", json!({})).await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
}

#[tokio::test]
async fn test_validation_errors() {
    let broker = TestBroker::spawn().await;
    broker.post_ok("/tasks/create", json!({"id": "TASK-A"})).await;

    let response = broker
        .post(
            "/tasks/updateProgress",
            json!({"taskId": "TASK-A", "progress": 150}),
        )
        .await;
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], "INVALID_INPUT");

    let response = broker
        .post(
            "/tasks/appendEvent",
            json!({"taskId": "TASK-A", "type": "explode", "message": "boom"}),
        )
        .await;
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    let response = broker
        .post(
            "/tasks/updateProgress",
            json!({"taskId": "ghost", "progress": 10}),
        )
        .await;
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_duplicate_create_conflicts() {
    let broker = TestBroker::spawn().await;

    broker.post_ok("/tasks/create", json!({"id": "TASK-A"})).await;
    // Different metadata so the derived idempotency key differs and the
    // call actually reaches the instance.
    let response = broker
        .post("/tasks/create", json!({"id": "TASK-A", "metadata": {"n": 2}}))
        .await;
    assert_eq!(response.status(), reqwest::StatusCode::CONFLICT);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], "DUPLICATE_ENTITY");
}

#[tokio::test]
async fn test_workflow_complete_auto_completes_phases() {
    let broker = TestBroker::spawn().await;

    broker
        .post_ok(
            "/workflows/create",
            json!({
                "id": "WF-1",
                "phases": [{"key": "build"}, {"key": "deploy"}],
            }),
        )
        .await;
    broker
        .post_ok(
            "/workflows/updatePhaseProgress",
            json!({"workflowId": "WF-1", "phase": "build", "progress": 30}),
        )
        .await;

    let result = broker
        .post_ok("/workflows/complete", json!({"workflowId": "WF-1"}))
        .await;
    assert_eq!(result["workflow"]["status"], "success");
    assert_eq!(result["workflow"]["overallProgress"], 100);
    for phase in result["phases"].as_array().unwrap() {
        assert_eq!(phase["status"], "success");
        assert_eq!(phase["progress"], 100);
    }
}

#[tokio::test]
async fn test_strict_complete_mode() {
    let broker = TestBroker::spawn_with(|config| {
        config.workflow.strict_complete = true;
    })
    .await;

    broker
        .post_ok(
            "/workflows/create",
            json!({"id": "WF-1", "phases": [{"key": "build"}]}),
        )
        .await;

    let response = broker
        .post("/workflows/complete", json!({"workflowId": "WF-1"}))
        .await;
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    broker
        .post_ok(
            "/workflows/completePhase",
            json!({"workflowId": "WF-1", "phase": "build"}),
        )
        .await;
    let result = broker
        .post_ok("/workflows/complete", json!({"workflowId": "WF-1"}))
        .await;
    assert_eq!(result["workflow"]["status"], "success");
}

#[tokio::test]
async fn test_delete_and_delete_all() {
    let broker = TestBroker::spawn().await;

    for id in ["TASK-A", "TASK-B", "TASK-C"] {
        broker.post_ok("/tasks/create", json!({"id": id})).await;
    }

    let deleted = broker
        .post_ok("/tasks/delete", json!({"id": "TASK-A"}))
        .await;
    assert_eq!(deleted["success"], true);

    let response = broker.post("/tasks/getById", json!({"id": "TASK-A"})).await;
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    let swept = broker.post_ok("/tasks/deleteAll", json!({})).await;
    assert_eq!(swept["deleted"], 2);
    assert_eq!(swept["failures"].as_array().unwrap().len(), 0);

    let all = broker.post_ok("/tasks/getAll", json!({})).await;
    assert!(all.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_workflow_fail_records_error() {
    let broker = TestBroker::spawn().await;

    broker
        .post_ok(
            "/workflows/create",
            json!({"id": "WF-1", "phases": [{"key": "build"}]}),
        )
        .await;
    let failed = broker
        .post_ok(
            "/workflows/fail",
            json!({"workflowId": "WF-1", "error": "builder offline"}),
        )
        .await;
    assert_eq!(failed["status"], "failed");
    assert!(failed.get("failedAt").is_some());

    let history = broker
        .post_ok("/workflows/getHistory", json!({"id": "WF-1", "limit": 10}))
        .await;
    assert_eq!(history[0]["eventType"], "error");
    assert_eq!(history[0]["message"], "builder offline");
}

#[tokio::test]
async fn test_healthz_and_info() {
    let broker = TestBroker::spawn().await;
    broker.post_ok("/tasks/create", json!({"id": "TASK-A"})).await;

    let health: serde_json::Value = reqwest::get(format!("{}/healthz", broker.base_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["tasks"], 1);

    let info: serde_json::Value = reqwest::get(format!("{}/info", broker.base_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(info["name"], "SpectralNotify");
}
