//! Router-level tests for the HTTP boundary.

use std::{sync::Arc, time::Duration};

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{TimeZone, Utc};
use serde_json::Value;
use sluice_api::{create_router, AppState};
use sluice_ingest::{IngestionService, RateGate, ServiceConfig};
use sluice_testing::{eventually, TestClock, TestEnv};
use tower::ServiceExt;

struct Harness {
    env: TestEnv,
    service: Arc<IngestionService>,
    app: Router,
}

impl Harness {
    fn new() -> Self {
        Self::with(ServiceConfig::default(), RateGate::new(1000.0, 100))
    }

    fn with(config: ServiceConfig, gate: RateGate) -> Self {
        let env = TestEnv {
            clock: TestClock::starting_at(Utc.with_ymd_and_hms(2024, 6, 1, 9, 30, 0).unwrap()),
            ..TestEnv::new()
        };
        let service = Arc::new(
            IngestionService::start(config, env.client(), env.metrics(), env.clock()).unwrap(),
        );
        let state = AppState {
            service: Arc::clone(&service),
            gate: Arc::new(gate),
            metrics: env.metrics(),
            clock: env.clock(),
            retry_after_seconds: 5,
        };
        let app = create_router(state, Duration::from_secs(10));
        Self { env, service, app }
    }

    async fn post(&self, body: &str) -> (StatusCode, axum::http::HeaderMap, Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/events")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    async fn get(&self, uri: &str) -> axum::response::Response {
        self.app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, headers, json)
    }
}

#[tokio::test]
async fn accepted_event_gets_generated_id() {
    let harness = Harness::new();

    let (status, headers, body) = harness.post(r#"{"type":"user.signup","payload":{"plan":"pro"}}"#).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "accepted");
    let id = body["id"].as_str().unwrap().to_string();
    assert!(!id.is_empty());
    assert_eq!(headers["x-request-id"], id.as_str());

    harness.service.shutdown().await.unwrap();
    let delivered = harness.env.primary.messages();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].key_str(), id);

    let event: Value = serde_json::from_slice(&delivered[0].value).unwrap();
    assert_eq!(event["type"], "user.signup");
    assert_eq!(event["timestamp"], "2024-06-01T09:30:00Z");
    assert_eq!(event["payload"]["plan"], "pro");
}

#[tokio::test]
async fn caller_id_and_timestamp_are_kept() {
    let harness = Harness::new();

    let (status, headers, body) =
        harness.post(r#"{"id":"evt-7","timestamp":"2023-03-04T05:06:07Z"}"#).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["id"], "evt-7");
    assert_eq!(headers["x-request-id"], "evt-7");

    harness.service.shutdown().await.unwrap();
    let event: Value = serde_json::from_slice(&harness.env.primary.messages()[0].value).unwrap();
    assert_eq!(event["timestamp"], "2023-03-04T05:06:07Z");
}

#[tokio::test]
async fn malformed_bodies_are_rejected_without_queueing() {
    let harness = Harness::new();

    for body in ["{not json", r#"{"id":42}"#, r#"{"timestamp":"yesterday"}"#, "[]"] {
        let (status, _, json) = harness.post(body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body {body}");
        assert_eq!(json["error"]["code"], "invalid_request");
    }

    assert_eq!(harness.env.metrics.received.get(), 0);
    assert_eq!(harness.env.metrics.http_requests.get(400), 4);
}

#[tokio::test]
async fn rate_limited_requests_get_429() {
    let harness = Harness::with(ServiceConfig::default(), RateGate::new(0.0, 1));

    let (first, _, _) = harness.post("{}").await;
    let (second, _, body) = harness.post("{}").await;

    assert_eq!(first, StatusCode::ACCEPTED);
    assert_eq!(second, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["code"], "rate_limited");
    assert_eq!(harness.env.metrics.received.get(), 1);
}

#[tokio::test]
async fn full_queue_returns_503_with_retry_after() {
    let config = ServiceConfig { worker_count: 1, queue_capacity: 1, ..Default::default() };
    let harness = Harness::with(config, RateGate::new(1000.0, 100));
    harness.env.primary.pause();

    let (held, _, _) = harness.post(r#"{"id":"held"}"#).await;
    eventually(|| harness.env.primary.write_calls() == 1).await;
    let (queued, _, _) = harness.post(r#"{"id":"queued"}"#).await;
    let (rejected, headers, body) = harness.post(r#"{"id":"rejected"}"#).await;

    assert_eq!(held, StatusCode::ACCEPTED);
    assert_eq!(queued, StatusCode::ACCEPTED);
    assert_eq!(rejected, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(headers["retry-after"], "5");
    assert_eq!(body["error"]["code"], "queue_full");

    harness.env.primary.resume();
    harness.service.shutdown().await.unwrap();
    assert_eq!(harness.env.primary.keys(), vec!["held", "queued"]);
}

#[tokio::test]
async fn requests_after_shutdown_are_refused() {
    let harness = Harness::new();
    harness.service.shutdown().await.unwrap();

    let (status, headers, body) = harness.post("{}").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(headers.get("retry-after").is_none());
    assert_eq!(body["error"]["code"], "shutting_down");
}

#[tokio::test]
async fn health_reports_queue_state() {
    let harness = Harness::new();

    let response = harness.get("/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(json["status"], "healthy");
    assert_eq!(json["queue_depth"], 0);
    assert_eq!(json["queue_capacity"], 1000);
    assert_eq!(json["workers"], 10);
    assert_eq!(json["accepting"], true);

    assert_eq!(harness.get("/live").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn metrics_are_exposed_as_prometheus_text() {
    let harness = Harness::new();
    harness.post(r#"{"id":"m-1"}"#).await;
    harness.service.shutdown().await.unwrap();

    let response = harness.get("/metrics").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/plain; version=0.0.4");

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("events_received_total 1"));
    assert!(text.contains("events_published_total 1"));
    assert!(text.contains("http_requests_total{status=\"202\"} 1"));
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let harness = Harness::new();
    assert_eq!(harness.get("/nope").await.status(), StatusCode::NOT_FOUND);
}
