use std::sync::Arc;

use axum::{
    extract::{Path, Query},
    response::IntoResponse,
    Extension, Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use resources::models::{ApiBody, ApiError, HandlerResult};
use resources::objects::uav::UavReport;

use crate::handler::with_cors;
use crate::AppState;

pub async fn uav_metrics(
    Extension(state): Extension<Arc<AppState>>,
) -> HandlerResult<impl IntoResponse> {
    let aggregator = state
        .aggregator
        .as_ref()
        .ok_or_else(|| ApiError::unavailable("metrics aggregator not available"))?;
    let metrics = aggregator.get_uav_metrics();
    let count = metrics.len();
    Ok(with_cors(
        ApiBody::success().field("data", metrics).field("count", count),
    ))
}

pub async fn single_uav_metrics(
    Extension(state): Extension<Arc<AppState>>,
    Path(node): Path<String>,
) -> HandlerResult<impl IntoResponse> {
    let aggregator = state
        .aggregator
        .as_ref()
        .ok_or_else(|| ApiError::unavailable("metrics aggregator not available"))?;
    let entry = aggregator
        .get_single_uav_metrics(&node)
        .ok_or_else(|| ApiError::not_found(format!("UAV on node {node}")))?;
    Ok(with_cors(ApiBody::success().field("data", entry)))
}

/// Ingestion endpoint: update the in-memory entry (best effort) and upsert
/// the persisted custom resource, reporting both outcomes.
pub async fn uav_report(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> HandlerResult<impl IntoResponse> {
    let mut report: UavReport = serde_json::from_value(payload)
        .map_err(|_| ApiError::bad_request("Invalid JSON body"))?;

    if report.node_name.is_empty() {
        return Err(ApiError::bad_request("node_name is required"));
    }
    report.apply_defaults(Utc::now());

    match state.aggregator.as_ref() {
        Some(aggregator) => aggregator.update_uav_report(&report),
        None => warn!(
            "metrics aggregator unavailable, skipping cache update for node {}",
            report.node_name
        ),
    }

    let mut crd_status = "unavailable";
    let mut crd_error = None;
    if let Some(client) = state.client.as_ref() {
        match client.upsert_uav_metric(None, &report).await {
            Ok(()) => crd_status = "updated",
            Err(err) => {
                warn!(
                    "failed to upsert UAVMetric for node {}: {err}",
                    report.node_name
                );
                crd_status = "error";
                crd_error = Some(err.to_string());
            }
        }
    }

    let mut body = ApiBody::success()
        .field("crd_status", crd_status)
        .field("node_name", &report.node_name)
        .field("uav_id", &report.uav_id)
        .field("uav_status", &report.status);
    if report.heartbeat_interval_seconds > 0 {
        body = body.field(
            "heartbeat_interval_seconds",
            report.heartbeat_interval_seconds,
        );
    }
    if let Some(message) = crd_error {
        body = body.field("message", message);
    }

    Ok(with_cors(body))
}

#[derive(Debug, Deserialize, Default)]
pub struct CrdListQuery {
    #[serde(default)]
    pub namespace: String,
}

pub async fn uav_crd_list(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<CrdListQuery>,
) -> HandlerResult<impl IntoResponse> {
    let client = state
        .client
        .as_ref()
        .ok_or_else(|| ApiError::unavailable("cluster access not available"))?;

    let namespace = query.namespace.trim();
    let namespace = if namespace.is_empty() || namespace.eq_ignore_ascii_case("all") {
        None
    } else {
        Some(namespace)
    };

    let resources = client
        .list_uav_metrics(namespace)
        .await
        .map_err(|err| ApiError::internal(err.to_string()))?;
    let count = resources.len();

    Ok(with_cors(
        ApiBody::success().field("data", resources).field("count", count),
    ))
}
