//! Full-stack REST integration tests.
//!
//! Each test wires the real engine (queue, worker, resolver, state store)
//! against in-memory fakes for the upstream services, builds the axum
//! router, and sends actual HTTP requests via `tower::ServiceExt`.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use tm_core::{PageKind, StateStore, SyncStatus};
use tm_engine::testing::{sample_item, sample_project, FakeDest, FakeSource};
use tm_engine::{Reconciler, Resolver, SyncConfig, SyncQueue, SyncWorker};
use tm_server::auth::sign_body;
use tm_server::{create_router, AppState};
use tm_storage::SqliteStateStore;

struct TestApp {
    router: axum::Router,
    source: Arc<FakeSource>,
    dest: Arc<FakeDest>,
    store: Arc<SqliteStateStore>,
    worker: Arc<SyncWorker>,
}

fn build(secret: Option<&str>, token: Option<&str>) -> TestApp {
    let cfg = Arc::new(SyncConfig::default());
    let source = Arc::new(FakeSource::new());
    let dest = Arc::new(FakeDest::new());
    let store = Arc::new(SqliteStateStore::in_memory("itest").unwrap());
    let queue = Arc::new(SyncQueue::in_memory(3).unwrap());
    let resolver = Arc::new(Resolver::new(
        dest.clone(),
        source.clone(),
        store.clone(),
        cfg.clone(),
    ));
    let worker = Arc::new(SyncWorker::new(
        queue.clone(),
        source.clone(),
        dest.clone(),
        store.clone(),
        resolver,
        cfg.clone(),
    ));
    let reconciler = Arc::new(Reconciler::new(
        source.clone(),
        dest.clone(),
        store.clone(),
        worker.clone(),
        cfg.clone(),
    ));

    let state = AppState::new(cfg, queue, worker.clone(), reconciler)
        .with_webhook_secret(secret.map(String::from))
        .with_reconcile_token(token.map(String::from));

    TestApp {
        router: create_router(Arc::new(state)),
        source,
        dest,
        store,
        worker,
    }
}

fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    match body {
        Some(value) => builder.body(Body::from(value.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn item_added_event(id: &str) -> Value {
    json!({
        "event_name": "item:added",
        "user_id": "u1",
        "event_data": {
            "id": id,
            "content": "Buy gloves",
            "description": "",
            "project_id": "P7",
            "labels": ["capsync"],
            "priority": 1,
            "url": format!("https://todoist.com/showTask?id={id}"),
            "created_at": "2026-08-01T00:00:00Z",
            "is_completed": false
        }
    })
}

#[tokio::test]
async fn health_endpoint() {
    let app = build(None, None);
    let response = app
        .router
        .oneshot(request(Method::GET, "/health", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"status": "healthy"}));
}

#[tokio::test]
async fn service_info_endpoint() {
    let app = build(None, None);
    let response = app
        .router
        .oneshot(request(Method::GET, "/", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["service"], "taskmirror");
    assert_eq!(body["eligibility_tag"], "capsync");
}

#[tokio::test]
async fn webhook_enqueues_and_worker_materializes() {
    let app = build(None, None);
    app.source.put_project(sample_project("P7", "Ops"));

    let response = app
        .router
        .clone()
        .oneshot(request(
            Method::POST,
            "/todoist/webhook",
            Some(item_added_event("A1")),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "queued");
    assert_eq!(body["task_id"], "A1");
    assert_eq!(body["action"], "UPSERT");

    // The event carried an inline snapshot, so the worker materializes the
    // page without the item ever existing in the fake source.
    let (ok, errored) = app.worker.drain_available().await;
    assert_eq!((ok, errored), (1, 0));
    assert_eq!(app.dest.pages_of_kind(PageKind::Task).len(), 1);
    let state = app.store.get_task("A1").await.unwrap().unwrap();
    assert_eq!(state.sync_status, SyncStatus::Ok);
}

#[tokio::test]
async fn webhook_rejects_invalid_signature() {
    let app = build(Some("shh"), None);
    let response = app
        .router
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/todoist/webhook")
                .header("content-type", "application/json")
                .header("x-todoist-hmac-sha256", "bogus")
                .body(Body::from(item_added_event("A1").to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn webhook_accepts_valid_signature() {
    let app = build(Some("shh"), None);
    app.source.put_project(sample_project("P7", "Ops"));
    let body = item_added_event("A1").to_string();
    let signature = sign_body("shh", body.as_bytes());

    let response = app
        .router
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/todoist/webhook")
                .header("content-type", "application/json")
                .header("x-todoist-hmac-sha256", signature)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn webhook_ignores_irrelevant_events() {
    let app = build(None, None);
    let response = app
        .router
        .oneshot(request(
            Method::POST,
            "/todoist/webhook",
            Some(json!({"event_name": "project:updated", "event_data": {"id": "P7"}})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ignored");
    assert_eq!(body["reason"], "irrelevant_event");
}

#[tokio::test]
async fn webhook_ignores_events_without_id() {
    let app = build(None, None);
    let response = app
        .router
        .oneshot(request(
            Method::POST,
            "/todoist/webhook",
            Some(json!({"event_name": "item:updated", "event_data": {}})),
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["reason"], "no_task_id");
}

#[tokio::test]
async fn item_deleted_maps_to_archive() {
    let app = build(None, None);
    let response = app
        .router
        .oneshot(request(
            Method::POST,
            "/todoist/webhook",
            Some(json!({
                "event_name": "item:deleted",
                "event_data": {"id": "A1", "content": "x", "project_id": "P7"}
            })),
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["action"], "ARCHIVE");
}

#[tokio::test]
async fn reconcile_requires_bearer_token() {
    let app = build(None, Some("cron-token"));
    let response = app
        .router
        .clone()
        .oneshot(request(Method::POST, "/reconcile", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .router
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/reconcile")
                .header("authorization", "Bearer wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn reconcile_returns_summary() {
    let app = build(None, Some("cron-token"));
    app.source.put_project(sample_project("P7", "Ops"));
    app.source.put_item(sample_item("A1", "P7", &["capsync"]));

    let response = app
        .router
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/reconcile")
                .header("authorization", "Bearer cron-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["active_found"], 1);
    assert_eq!(body["upserted"], 1);
    assert_eq!(body["archived"], 0);
    assert_eq!(body["errors"], 0);
    assert!(body["duration_s"].as_f64().is_some());

    assert_eq!(app.dest.pages_of_kind(PageKind::Task).len(), 1);
}

#[tokio::test]
async fn queue_push_accepts_bare_message() {
    let app = build(None, None);
    let response = app
        .router
        .oneshot(request(
            Method::POST,
            "/queue/push",
            Some(json!({
                "action": "UPSERT",
                "source_item_id": "A1",
                "source": "manual"
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "queued");
}

#[tokio::test]
async fn queue_push_unwraps_bus_envelope() {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;

    let app = build(None, None);
    let inner = json!({
        "action": "ARCHIVE",
        "source_item_id": "A9",
        "source": "manual"
    });
    let envelope = json!({
        "message": {"data": BASE64.encode(inner.to_string())},
        "subscription": "projects/x/subscriptions/y"
    });

    let response = app
        .router
        .oneshot(request(Method::POST, "/queue/push", Some(envelope)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn queue_push_rejects_garbage() {
    let app = build(None, None);
    let response = app
        .router
        .oneshot(request(
            Method::POST,
            "/queue/push",
            Some(json!({"nope": true})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
