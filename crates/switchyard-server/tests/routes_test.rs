//! HTTP route tests against the in-memory backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use switchyard::pool::{
    Connection, ConnectionError, ConnectionFactory, ConnectionPool, InMemoryConnectionFactory,
    PoolAdmission, PoolConfig,
};
use switchyard::queue::{QueueConfig, TaskQueue};
use switchyard::{Metrics, RetryPolicy};
use switchyard_server::{build_state, router, routes, AppState, ServerConfig};

fn test_config() -> ServerConfig {
    ServerConfig {
        pool: PoolConfig::default().with_max_size(2).with_min_size(1),
        queue: QueueConfig::default()
            .with_consumer_count(2)
            .with_capacity(16),
        ..ServerConfig::default()
    }
}

async fn test_app(
    factory: InMemoryConnectionFactory,
) -> (Router, AppState<InMemoryConnectionFactory>) {
    test_app_with(factory, test_config()).await
}

async fn test_app_with(
    factory: InMemoryConnectionFactory,
    config: ServerConfig,
) -> (Router, AppState<InMemoryConnectionFactory>) {
    let state = build_state(&config, factory).await.unwrap();
    (router(state.clone(), &config), state)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health_reports_pool_and_queue() {
    let (app, state) = test_app(InMemoryConnectionFactory::new()).await;

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["queue"], "running");
    assert_eq!(body["pool"]["max_size"], 2);
    assert_eq!(body["pool"]["live"], 1);

    switchyard_server::shutdown(&state).await;
    let (_, body) = send(&app, get("/health")).await;
    assert_eq!(body["status"], "stopping");
}

/// A backend with no record access at all
struct PingOnlyFactory;

struct PingOnly;

#[async_trait]
impl Connection for PingOnly {
    async fn ping(&mut self) -> Result<(), ConnectionError> {
        Ok(())
    }

    async fn close(self) -> Result<(), ConnectionError> {
        Ok(())
    }
}

#[async_trait]
impl ConnectionFactory for PingOnlyFactory {
    type Connection = PingOnly;

    async fn connect(&self) -> Result<PingOnly, ConnectionError> {
        Ok(PingOnly)
    }
}

#[tokio::test]
async fn test_health_serves_any_backend() {
    let metrics = Metrics::new();
    let pool = Arc::new(ConnectionPool::new(
        PingOnlyFactory,
        PoolConfig::default(),
        Arc::clone(&metrics),
    ));
    let queue = Arc::new(TaskQueue::new(QueueConfig::default(), Arc::clone(&metrics)));
    let state = AppState {
        admission: PoolAdmission::new(Arc::clone(&pool), RetryPolicy::default()),
        pool,
        queue,
        metrics,
        read_retry: RetryPolicy::default(),
    };
    let app = routes::health::routes(state);

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["queue"], "idle");
    assert_eq!(body["pool"]["live"], 0);

    let (status, body) = send(&app, get("/v1/stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pool"]["acquired"], 0);
}

#[tokio::test]
async fn test_record_write_then_read() {
    let (app, _state) = test_app(InMemoryConnectionFactory::new()).await;

    let (status, body) = send(
        &app,
        post("/v1/records", json!({"key": "user:1", "value": {"name": "Ada"}})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["value"]["name"], "Ada");

    let (status, body) = send(&app, get("/v1/records/user:1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["key"], "user:1");

    let (status, body) = send(&app, get("/v1/records/missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("missing"));
}

#[tokio::test]
async fn test_record_write_survives_stale_sessions() {
    // Both eagerly opened slots predate the write. The write lands on the
    // first, so the read-back draws the second, stale one before it.
    let factory = InMemoryConnectionFactory::new().with_snapshot_reads();
    let config = ServerConfig {
        pool: PoolConfig::default().with_max_size(2).with_min_size(2),
        ..test_config()
    };
    let (app, state) = test_app_with(factory, config).await;

    let (status, body) = send(&app, post("/v1/records", json!({"key": "k", "value": 7}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["value"], 7);

    let pool = state.metrics.pool.snapshot();
    assert_eq!(pool.visibility_retries, 1);
    assert_eq!(pool.slots_discarded, 1);
}

#[tokio::test]
async fn test_task_is_queued_and_processed() {
    let factory = InMemoryConnectionFactory::new();
    let (app, state) = test_app(factory.clone()).await;

    let (status, body) = send(
        &app,
        post("/v1/tasks", json!({"key": "from-task", "value": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["admitted"], "enqueued");
    assert!(body["id"].is_string());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while factory.record_count() == 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(factory.record_count(), 1);

    let (_, stats) = send(&app, get("/v1/stats")).await;
    assert_eq!(stats["queue"]["enqueued"], 1);
    assert_eq!(stats["queue"]["tasks_processed"], 1);

    switchyard_server::shutdown(&state).await;
}

#[tokio::test]
async fn test_task_must_be_an_object() {
    let (app, _state) = test_app(InMemoryConnectionFactory::new()).await;

    let (status, body) = send(&app, post("/v1/tasks", json!([1, 2, 3]))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_task_rejected_after_shutdown() {
    let (app, state) = test_app(InMemoryConnectionFactory::new()).await;
    state.queue.stop();

    let (status, body) = send(&app, post("/v1/tasks", json!({"n": 1}))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "task rejected: queue is not running");
}
