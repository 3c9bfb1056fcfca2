use std::sync::Arc;

use axum::{extract::Path, response::IntoResponse, Extension};

use resources::models::{ApiBody, ApiError, HandlerResult};

use crate::aggregator::MetricsAggregator;
use crate::handler::with_cors;
use crate::AppState;

fn aggregator(state: &AppState) -> Result<&Arc<MetricsAggregator>, ApiError> {
    state
        .aggregator
        .as_ref()
        .ok_or_else(|| ApiError::unavailable("metrics aggregator not available"))
}

pub async fn cluster_metrics(
    Extension(state): Extension<Arc<AppState>>,
) -> HandlerResult<impl IntoResponse> {
    let aggregator = aggregator(&state)?;
    Ok(with_cors(
        ApiBody::success().field("data", aggregator.get_cluster_metrics()),
    ))
}

pub async fn node_metrics(
    Extension(state): Extension<Arc<AppState>>,
) -> HandlerResult<impl IntoResponse> {
    let aggregator = aggregator(&state)?;
    let snapshot = aggregator.get_latest_snapshot();
    Ok(with_cors(
        ApiBody::success()
            .field("data", &snapshot.node_metrics)
            .field("count", snapshot.node_metrics.len())
            .field("timestamp", snapshot.timestamp),
    ))
}

pub async fn single_node_metrics(
    Extension(state): Extension<Arc<AppState>>,
    Path(name): Path<String>,
) -> HandlerResult<impl IntoResponse> {
    let aggregator = aggregator(&state)?;
    let metrics = aggregator
        .get_node_metrics(&name)
        .ok_or_else(|| ApiError::not_found(format!("metrics for node {name}")))?;
    Ok(with_cors(ApiBody::success().field("data", metrics)))
}

pub async fn pod_metrics(
    Extension(state): Extension<Arc<AppState>>,
) -> HandlerResult<impl IntoResponse> {
    let aggregator = aggregator(&state)?;
    let snapshot = aggregator.get_latest_snapshot();
    Ok(with_cors(
        ApiBody::success()
            .field("data", &snapshot.pod_metrics)
            .field("count", snapshot.pod_metrics.len())
            .field("timestamp", snapshot.timestamp),
    ))
}

pub async fn snapshot(
    Extension(state): Extension<Arc<AppState>>,
) -> HandlerResult<impl IntoResponse> {
    let aggregator = aggregator(&state)?;
    Ok(with_cors(
        ApiBody::success().field("data", aggregator.get_latest_snapshot().as_ref()),
    ))
}

pub async fn network_metrics(
    Extension(state): Extension<Arc<AppState>>,
) -> HandlerResult<impl IntoResponse> {
    let aggregator = aggregator(&state)?;
    let metrics = aggregator.get_network_metrics();
    let count = metrics.len();
    Ok(with_cors(
        ApiBody::success().field("data", metrics).field("count", count),
    ))
}
