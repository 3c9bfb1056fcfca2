use std::sync::Arc;

use axum::{
    http::header,
    response::IntoResponse,
    routing::{get, post},
    Extension, Router,
};

use resources::models::ApiBody;

use crate::AppState;

mod analyze;
mod cluster;
mod health;
mod metrics;
mod pods;
mod uav;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/v1/cluster/status", get(cluster::cluster_status))
        .route("/api/v1/pods", get(pods::list_pods))
        .route(
            "/api/v1/analyze/pod-communication",
            post(analyze::pod_communication),
        )
        .route("/api/v1/metrics/cluster", get(metrics::cluster_metrics))
        .route("/api/v1/metrics/nodes", get(metrics::node_metrics))
        .route("/api/v1/metrics/nodes/:name", get(metrics::single_node_metrics))
        .route("/api/v1/metrics/pods", get(metrics::pod_metrics))
        .route("/api/v1/metrics/snapshot", get(metrics::snapshot))
        .route("/api/v1/metrics/network", get(metrics::network_metrics))
        .route("/api/v1/metrics/uav", get(uav::uav_metrics))
        .route("/api/v1/metrics/uav/:node", get(uav::single_uav_metrics))
        .route("/api/v1/uav/report", post(uav::uav_report))
        .route("/api/v1/crd/uav", get(uav::uav_crd_list))
        .layer(Extension(state))
}

/// Metrics endpoints answer cross-origin dashboards.
pub(crate) fn with_cors(body: ApiBody) -> impl IntoResponse {
    ([(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")], body)
}
