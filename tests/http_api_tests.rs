#![cfg(feature = "http_api")]

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use task_engine::TaskManager;
use task_engine::http_api::{AppState, router};
use tower::ServiceExt;

fn app() -> Router {
    router(AppState::new(TaskManager::new()).unwrap())
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn health_is_ok() {
    let app = app();
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn create_link_and_read_back() {
    let app = app();
    let (status, a) = send(
        &app,
        "POST",
        "/tasks",
        Some(json!({ "name": "Survey", "work_hours": 8 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(a["id"], 1);
    assert_eq!(a["start"], "2025-01-01T09:00:00");
    assert_eq!(a["finish"], "2025-01-01T17:00:00");

    let (_, b) = send(
        &app,
        "POST",
        "/tasks",
        Some(json!({ "name": "Dig", "work_hours": 4 })),
    )
    .await;
    let (status, dep) = send(
        &app,
        "POST",
        "/dependencies",
        Some(json!({ "predecessor": a["id"], "successor": b["id"], "relation": "finish_to_start" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(dep["relation"], "finish_to_start");

    let (status, dig) = send(&app, "GET", "/tasks/2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dig["start"], "2025-01-02T09:00:00");
    assert_eq!(dig["critical"], true);

    let (_, summary) = send(&app, "GET", "/summary", None).await;
    assert_eq!(summary["task_count"], 2);
    assert_eq!(summary["critical_path"], json!([1, 2]));

    let (_, events) = send(&app, "GET", "/events", None).await;
    let events = events.as_array().unwrap();
    assert!(events.iter().any(|e| e["event"] == "task_changed" && e["data"] == 2));
    let (_, drained) = send(&app, "GET", "/events", None).await;
    assert_eq!(drained, json!([]));
}

#[tokio::test]
async fn errors_map_to_status_codes() {
    let app = app();
    let (status, body) = send(&app, "GET", "/tasks/42", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    send(&app, "POST", "/tasks", Some(json!({ "name": "a", "work_hours": 1 }))).await;
    send(&app, "POST", "/tasks", Some(json!({ "name": "b", "work_hours": 1 }))).await;
    let link = json!({ "predecessor": 1, "successor": 2 });
    assert_eq!(
        send(&app, "POST", "/dependencies", Some(link)).await.0,
        StatusCode::CREATED
    );
    let (status, body) = send(
        &app,
        "POST",
        "/dependencies",
        Some(json!({ "predecessor": 2, "successor": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let (status, body) = send(
        &app,
        "POST",
        "/tasks",
        Some(json!({ "name": "negative", "work_hours": -1 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn blocked_edits_are_applied_on_release() {
    let app = app();
    let (_, report) = send(&app, "POST", "/block", Some(json!({ "block": true }))).await;
    assert_eq!(report["changed"], json!([]));

    let (status, task) = send(
        &app,
        "POST",
        "/tasks",
        Some(json!({ "name": "Pour", "work_hours": 16 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(task["start"], Value::Null);

    let (_, report) = send(&app, "POST", "/block", Some(json!({ "block": false }))).await;
    assert_eq!(report["changed"], json!([1]));
    assert_eq!(report["project_finish"], "2025-01-02T17:00:00");
}

#[tokio::test]
async fn move_and_delete_subtree() {
    let app = app();
    send(&app, "POST", "/tasks", Some(json!({ "name": "Phase", "work_hours": 0 }))).await;
    send(&app, "POST", "/tasks", Some(json!({ "name": "Step", "work_hours": 2 }))).await;

    let (status, moved) = send(
        &app,
        "POST",
        "/tasks/2/move",
        Some(json!({ "parent": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(moved["id"], 2);

    let (_, dump) = send(&app, "GET", "/dump", None).await;
    assert!(dump["list"].as_str().unwrap().starts_with("id\tparent\tname"));
    assert!(dump["tree"].as_str().unwrap().contains("Step"));

    let (status, body) = send(&app, "DELETE", "/tasks/1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], json!([1, 2]));

    let (_, tasks) = send(&app, "GET", "/tasks", None).await;
    assert_eq!(tasks, json!([]));
}
