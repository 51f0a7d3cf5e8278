use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use remora_api::{ApiState, router};
use remora_executor::{Executor, ExecutorConfig};
use remora_scheduler::{Scheduler, SchedulerConfig};
use remora_store::SqliteStore;
use serde_json::{Value, json};
use tower::ServiceExt;

struct TestApp {
  _dir: tempfile::TempDir,
  scheduler: Arc<Scheduler>,
  app: Router,
}

async fn test_app() -> TestApp {
  let dir = tempfile::tempdir().unwrap();
  let store = Arc::new(SqliteStore::open(dir.path().join("tasks.db")).await.unwrap());
  let scheduler = Arc::new(Scheduler::new(
    Arc::new(Executor::new(ExecutorConfig {
      max_workers: 3,
      ..Default::default()
    })),
    store.clone(),
    None,
    SchedulerConfig {
      renew_interval: None,
      tick: Duration::from_millis(20),
    },
  ));
  let app = router(ApiState {
    scheduler: scheduler.clone(),
    store,
  });
  TestApp {
    _dir: dir,
    scheduler,
    app,
  }
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
  let mut request = Request::builder().method(method).uri(uri);
  let body = match body {
    Some(json) => {
      request = request.header("content-type", "application/json");
      Body::from(json.to_string())
    }
    None => Body::empty(),
  };

  let response = app
    .clone()
    .oneshot(request.body(body).unwrap())
    .await
    .unwrap();
  let status = response.status();
  let bytes = response.into_body().collect().await.unwrap().to_bytes();
  (status, serde_json::from_slice(&bytes).unwrap())
}

async fn wait_for_status(app: &Router, id: &str, wanted: &str) -> Value {
  for _ in 0..250 {
    let (_, body) = send(app, "GET", &format!("/api/v1/tasks/{id}"), None).await;
    if body["data"]["status"] == wanted {
      return body["data"].clone();
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
  }
  panic!("task {id} never reached {wanted}");
}

#[tokio::test]
async fn test_ping() {
  let t = test_app().await;
  let (status, body) = send(&t.app, "GET", "/api/v1/ping", None).await;

  assert_eq!(status, StatusCode::OK);
  assert_eq!(
    body,
    json!({"success": true, "code": 0, "message": "ok", "data": {"ok": true}})
  );
}

#[tokio::test]
async fn test_create_task_runs_it() {
  let t = test_app().await;
  t.scheduler.start().await.unwrap();

  let (status, body) = send(
    &t.app,
    "POST",
    "/api/v1/tasks",
    Some(json!({"name": "greet", "command": "echo hello from api"})),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["code"], 0);
  let created = &body["data"];
  assert_eq!(created["name"], "greet");
  assert_eq!(created["type"], "shell");
  assert_eq!(created["priority"], 5);
  assert_eq!(created["status"], "pending");
  assert_eq!(created["attempt_id"], "");
  let id = created["id"].as_str().unwrap().to_string();
  assert!(!id.is_empty());

  let done = wait_for_status(&t.app, &id, "completed").await;
  assert_eq!(done["exit_code"], 0);
  assert!(done["stdout"].as_str().unwrap().contains("hello from api"));

  t.scheduler.stop().await;
}

#[tokio::test]
async fn test_create_task_keeps_explicit_fields() {
  let t = test_app().await;
  let (status, body) = send(
    &t.app,
    "POST",
    "/api/v1/tasks",
    Some(json!({
      "type": "python",
      "command": "python3",
      "args": ["-c", "print(1)"],
      "workdir": "/tmp",
      "env": {"MODE": "test"},
      "timeout": 30,
      "priority": 1
    })),
  )
  .await;

  assert_eq!(status, StatusCode::OK);
  let created = &body["data"];
  assert_eq!(created["type"], "python");
  assert_eq!(created["args"], json!(["-c", "print(1)"]));
  assert_eq!(created["env"]["MODE"], "test");
  assert_eq!(created["timeout"], 30);
  assert_eq!(created["priority"], 1);
}

#[tokio::test]
async fn test_create_task_requires_command() {
  let t = test_app().await;
  let (status, body) = send(&t.app, "POST", "/api/v1/tasks", Some(json!({"name": "x"}))).await;

  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert_eq!(body["success"], false);
  assert_eq!(body["code"], 30005);
  assert!(body.get("data").is_none());
}

#[tokio::test]
async fn test_create_task_rejects_bad_body() {
  let t = test_app().await;

  let request = Request::builder()
    .method("POST")
    .uri("/api/v1/tasks")
    .header("content-type", "application/json")
    .body(Body::from("{ not json"))
    .unwrap();
  let response = t.app.clone().oneshot(request).await.unwrap();
  assert_eq!(response.status(), StatusCode::BAD_REQUEST);

  let (status, body) = send(
    &t.app,
    "POST",
    "/api/v1/tasks",
    Some(json!({"command": "true", "type": "perl"})),
  )
  .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert_eq!(body["code"], 30005);
}

#[tokio::test]
async fn test_get_unknown_task_is_not_found() {
  let t = test_app().await;
  let (status, body) = send(&t.app, "GET", "/api/v1/tasks/missing", None).await;

  assert_eq!(status, StatusCode::NOT_FOUND);
  assert_eq!(body["code"], 30004);
  assert_eq!(body["message"], "task not found");
}

#[tokio::test]
async fn test_cancel_queued_task() {
  let t = test_app().await;
  // Not started: the task stays queued.
  let (_, body) = send(&t.app, "POST", "/api/v1/tasks", Some(json!({"command": "true"}))).await;
  let id = body["data"]["id"].as_str().unwrap().to_string();

  let (status, body) = send(&t.app, "POST", &format!("/api/v1/tasks/{id}/cancel"), None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body, json!({"success": true, "code": 0, "message": "ok"}));

  let (_, body) = send(&t.app, "GET", &format!("/api/v1/tasks/{id}"), None).await;
  assert_eq!(body["data"]["status"], "cancelled");

  let (status, body) = send(&t.app, "POST", &format!("/api/v1/tasks/{id}/cancel"), None).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  assert_eq!(body["code"], 30004);
}

#[tokio::test]
async fn test_cancel_running_task() {
  let t = test_app().await;
  t.scheduler.start().await.unwrap();

  let (_, body) = send(
    &t.app,
    "POST",
    "/api/v1/tasks",
    Some(json!({"command": "sleep 30"})),
  )
  .await;
  let id = body["data"]["id"].as_str().unwrap().to_string();
  wait_for_status(&t.app, &id, "running").await;

  let (status, _) = send(&t.app, "POST", &format!("/api/v1/tasks/{id}/cancel"), None).await;
  assert_eq!(status, StatusCode::OK);
  wait_for_status(&t.app, &id, "cancelled").await;

  t.scheduler.stop().await;
}

#[tokio::test]
async fn test_queue_status() {
  let t = test_app().await;
  for _ in 0..2 {
    send(&t.app, "POST", "/api/v1/tasks", Some(json!({"command": "true"}))).await;
  }

  let (status, body) = send(&t.app, "GET", "/api/v1/queue/status", None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(
    body["data"],
    json!({"pending": 2, "running": 0, "capacity": 3})
  );
}
