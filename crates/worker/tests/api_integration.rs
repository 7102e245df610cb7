//! Integration tests for the operator API.

use std::sync::Arc;
use std::sync::OnceLock;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use metrics_exporter_prometheus::PrometheusHandle;
use saga_store::{CompensationCommand, InMemorySagaStore, SagaId, SagaStore, Version};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup() -> (axum::Router, InMemorySagaStore) {
    let store = InMemorySagaStore::new();
    let state = Arc::new(worker::AppState {
        store: store.clone(),
    });
    let app = worker::create_app(state, get_metrics_handle());
    (app, store)
}

#[tokio::test]
async fn test_health_check() {
    let (app, _) = setup();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _) = setup();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_get_saga_returns_durable_record() {
    let (app, store) = setup();

    let saga_id = SagaId::new();
    let mut instance = store.create(saga_id, "OrderFulfillment").await.unwrap();
    instance.record_step_completed(
        "AwaitPayment",
        Some(CompensationCommand::new("payment.refund", "payment.refund")),
    );
    store
        .compare_and_swap(&instance, Version::first())
        .await
        .unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/sagas/{saga_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["saga_id"], saga_id.to_string());
    assert_eq!(json["saga_type"], "OrderFulfillment");
    assert_eq!(json["status"], "Running");
    assert_eq!(json["current_step"], "AwaitPayment");
    assert_eq!(json["version"], 2);
    assert_eq!(json["history"].as_array().unwrap().len(), 1);
    assert_eq!(json["history"][0]["step_name"], "AwaitPayment");
    assert_eq!(json["history"][0]["outcome"], "completed");
}

#[tokio::test]
async fn test_get_unknown_saga_is_404() {
    let (app, _) = setup();

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/sagas/{}", SagaId::new()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_get_saga_with_invalid_id_is_400() {
    let (app, _) = setup();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/sagas/not-a-uuid")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(json["error"].as_str().unwrap().contains("invalid saga id"));
}

#[tokio::test]
async fn test_failed_saga_exposes_reason_and_history() {
    let (app, store) = setup();

    let saga_id = SagaId::new();
    let mut instance = store.create(saga_id, "OrderFulfillment").await.unwrap();
    instance.record_step_completed(
        "AwaitPayment",
        Some(CompensationCommand::new("payment.refund", "payment.refund")),
    );
    instance.record_step_failed("FulfillmentFailed", "carrier unavailable");
    instance.begin_compensation();
    instance.record_step_compensated("AwaitPayment");
    instance.fail("fulfillment.failed: carrier unavailable");
    store
        .compare_and_swap(&instance, Version::first())
        .await
        .unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/sagas/{saga_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "Failed");
    assert_eq!(json["failure_reason"], "fulfillment.failed: carrier unavailable");

    let history = json["history"].as_array().unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[1]["outcome"], "failed");
    assert_eq!(history[1]["detail"], "carrier unavailable");
    assert_eq!(history[2]["outcome"], "compensated");
}
