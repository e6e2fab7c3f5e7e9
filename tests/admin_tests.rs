//! Feed admin routes driven through the router without a socket.

use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use rep::feed::admin::admin_router;
use rep::feed::{MemoryFeed, WorkFeed};
use rep::models::{ExecutorAction, RepPresence, Task, TaskState};

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, value)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_desire_task_with_guid() {
    let feed = MemoryFeed::new();
    let (status, body) = send(
        admin_router(feed.clone()),
        post_json(
            "/api/tasks",
            json!({
                "guid": "task-1",
                "stack": "linux64",
                "memory_mb": 128,
                "actions": [{"action": "run", "args": {"script": "echo hi"}}]
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["guid"], "task-1");

    let task = feed.task("task-1").await.unwrap();
    assert_eq!(task.state, TaskState::Pending);
    assert_eq!(task.stack, "linux64");
    assert_eq!(task.memory_mb, 128);
    assert_eq!(task.actions, vec![ExecutorAction::run("echo hi")]);
}

#[tokio::test]
async fn test_desire_task_generates_guid() {
    let feed = MemoryFeed::new();
    let (status, body) = send(
        admin_router(feed.clone()),
        post_json("/api/tasks", json!({"stack": "linux64"})),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    let guid = body["guid"].as_str().unwrap();
    assert!(!guid.is_empty());
    assert!(feed.task(guid).await.is_some());
}

#[tokio::test]
async fn test_duplicate_task_is_a_conflict() {
    let feed = MemoryFeed::new();
    feed.desire_task(Task::new("task-1", "linux64")).await.unwrap();

    let (status, body) = send(
        admin_router(feed),
        post_json("/api/tasks", json!({"guid": "task-1", "stack": "linux64"})),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("task-1"));
}

#[tokio::test]
async fn test_empty_stack_is_rejected() {
    let feed = MemoryFeed::new();
    let (status, body) = send(
        admin_router(feed.clone()),
        post_json("/api/tasks", json!({"stack": ""})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(feed.tasks().await.is_empty());
}

#[tokio::test]
async fn test_get_task() {
    let feed = MemoryFeed::new();
    feed.desire_task(Task::new("task-1", "linux64")).await.unwrap();

    let (status, body) = send(admin_router(feed.clone()), get("/api/tasks/task-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["guid"], "task-1");
    assert_eq!(body["state"], "pending");

    let (status, _) = send(admin_router(feed), get("/api/tasks/missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_tasks_shows_resolution() {
    let feed = MemoryFeed::new();
    let task = Task::new("task-1", "linux64");
    feed.desire_task(task.clone()).await.unwrap();
    feed.claim_task(&task, "rep-1").await.unwrap();
    feed.complete_task("task-1", true, "oom", "").await.unwrap();

    let (status, body) = send(admin_router(feed), get("/api/tasks")).await;
    assert_eq!(status, StatusCode::OK);
    let tasks = body.as_array().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0]["state"], "completed");
    assert_eq!(tasks[0]["failed"], true);
    assert_eq!(tasks[0]["failure_reason"], "oom");
    assert_eq!(tasks[0]["claimed_by"], "rep-1");
}

#[tokio::test]
async fn test_desire_and_list_lrps() {
    let feed = MemoryFeed::new();
    let (status, _) = send(
        admin_router(feed.clone()),
        post_json("/api/lrps", json!({"guid": "web-0", "stack": "linux64"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(admin_router(feed), get("/api/lrps")).await;
    assert_eq!(status, StatusCode::OK);
    let lrps = body.as_array().unwrap();
    assert_eq!(lrps.len(), 1);
    assert_eq!(lrps[0]["guid"], "web-0");
    assert_eq!(lrps[0]["state"], "desired");
}

#[tokio::test(start_paused = true)]
async fn test_presence_reports_liveness() {
    let feed = MemoryFeed::new();
    let _short = feed
        .maintain_presence(&RepPresence::new("rep-short", "linux64"), Duration::from_secs(1))
        .await
        .unwrap();
    let _long = feed
        .maintain_presence(&RepPresence::new("rep-long", "windows2012"), Duration::from_secs(60))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;

    let (status, body) = send(admin_router(feed), get("/api/presence")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!([
            {"rep_id": "rep-long", "stack": "windows2012", "live": true},
            {"rep_id": "rep-short", "stack": "linux64", "live": false}
        ])
    );
}
