//! Integration tests for the HTTP façade, driven without a cluster: the
//! aggregator runs with no sources and cluster access is absent, so the
//! endpoints exercise their degraded and error paths plus the in-memory
//! ingestion round trip.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use monitor_server::aggregator::MetricsAggregator;
use monitor_server::{handler, AppState};

fn test_app(with_aggregator: bool) -> (Router, Arc<AppState>) {
    let aggregator = with_aggregator
        .then(|| Arc::new(MetricsAggregator::new(Duration::from_secs(30), false)));
    let state = Arc::new(AppState {
        client: None,
        aggregator,
    });
    (handler::router(state.clone()), state)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, payload: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_reports_version_and_timestamp() {
    let (app, _) = test_app(true);
    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert!(body["version"].is_string());
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn cluster_status_degrades_to_warning_without_cluster_access() {
    let (app, _) = test_app(true);
    let response = app.oneshot(get("/api/v1/cluster/status")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "warning");
    assert!(body["message"].as_str().unwrap().contains("development mode"));
}

#[tokio::test]
async fn pods_listing_degrades_to_empty_list() {
    let (app, _) = test_app(true);
    let body = body_json(app.oneshot(get("/api/v1/pods")).await.unwrap()).await;
    assert_eq!(body["status"], "warning");
    assert_eq!(body["count"], 0);
    assert_eq!(body["pods"], json!([]));
}

#[tokio::test]
async fn metrics_endpoints_return_503_without_aggregator() {
    let (app, _) = test_app(false);
    for uri in [
        "/api/v1/metrics/cluster",
        "/api/v1/metrics/nodes",
        "/api/v1/metrics/pods",
        "/api/v1/metrics/snapshot",
        "/api/v1/metrics/network",
        "/api/v1/metrics/uav",
    ] {
        let response = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE, "{uri}");
        let body = body_json(response).await;
        assert_eq!(body["status"], "error");
    }
}

#[tokio::test]
async fn metrics_endpoints_carry_cors_header() {
    let (app, _) = test_app(true);
    let response = app.oneshot(get("/api/v1/metrics/cluster")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "*"
    );
}

#[tokio::test]
async fn empty_snapshot_has_counts_and_cluster_section() {
    let (app, state) = test_app(true);
    state.aggregator.as_ref().unwrap().collect().await;

    let body = body_json(app.oneshot(get("/api/v1/metrics/snapshot")).await.unwrap()).await;
    assert_eq!(body["status"], "success");
    assert_eq!(body["data"]["node_metrics"], json!({}));
    assert_eq!(body["data"]["cluster_metrics"]["health_status"], "healthy");
    assert!(body["data"]["timestamp"].is_string());
}

#[tokio::test]
async fn uav_report_round_trips_through_the_cache() {
    let (app, _) = test_app(true);

    let report = json!({
        "node_name": "node-a",
        "uav_id": "uav-a",
        "heartbeat_interval_seconds": 15,
        "state": {"battery": {"remaining_percent": 55.0}},
    });
    let response = app
        .clone()
        .oneshot(post_json("/api/v1/uav/report", report))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "success");
    // No cluster access in this setup, so the persisted side is skipped.
    assert_eq!(body["crd_status"], "unavailable");
    assert_eq!(body["node_name"], "node-a");
    assert_eq!(body["uav_id"], "uav-a");
    assert_eq!(body["uav_status"], "active");
    assert_eq!(body["heartbeat_interval_seconds"], 15);

    let body = body_json(
        app.clone()
            .oneshot(get("/api/v1/metrics/uav/node-a"))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(body["data"]["source"], "agent");
    assert_eq!(
        body["data"]["state"]["battery"]["remaining_percent"],
        55.0
    );

    let body = body_json(app.oneshot(get("/api/v1/metrics/uav")).await.unwrap()).await;
    assert_eq!(body["count"], 1);
}

#[tokio::test]
async fn uav_report_defaults_the_uav_id() {
    let (app, state) = test_app(true);
    let response = app
        .oneshot(post_json("/api/v1/uav/report", json!({"node_name": "node-b"})))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["uav_id"], "uav-node-b");

    let entry = state
        .aggregator
        .as_ref()
        .unwrap()
        .get_single_uav_metrics("node-b")
        .unwrap();
    assert_eq!(entry.uav_id, "uav-node-b");
}

#[tokio::test]
async fn uav_report_without_node_name_is_rejected() {
    let (app, _) = test_app(true);
    let response = app
        .oneshot(post_json("/api/v1/uav/report", json!({"uav_id": "uav-a"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn unknown_uav_node_is_404() {
    let (app, _) = test_app(true);
    let response = app.oneshot(get("/api/v1/metrics/uav/ghost")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn wrong_method_is_405() {
    let (app, _) = test_app(true);
    let response = app.oneshot(get("/api/v1/uav/report")).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn analysis_validates_input_before_cluster_access() {
    let (app, _) = test_app(true);

    // Missing fields fail first.
    let response = app
        .clone()
        .oneshot(post_json(
            "/api/v1/analyze/pod-communication",
            json!({"pod_a": "default/nginx"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // With both fields but no cluster access, it is unavailable.
    let response = app
        .oneshot(post_json(
            "/api/v1/analyze/pod-communication",
            json!({"pod_a": "default/nginx", "pod_b": "default/busybox"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
