use std::sync::Arc;

use axum::{Extension, Json};
use serde::Deserialize;

use cluster::analyze::NetworkAnalyzer;
use cluster::Error;
use resources::models::{ApiBody, ApiError, HandlerResult};

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub pod_a: String,
    #[serde(default)]
    pub pod_b: String,
}

pub async fn pod_communication(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<AnalyzeRequest>,
) -> HandlerResult {
    if request.pod_a.is_empty() || request.pod_b.is_empty() {
        return Err(ApiError::bad_request("pod_a and pod_b are required"));
    }

    let client = state
        .client
        .as_ref()
        .ok_or_else(|| ApiError::unavailable("cluster access not available"))?;

    let analyzer = NetworkAnalyzer::new(client);
    let analysis = analyzer
        .analyze_pod_communication(&request.pod_a, &request.pod_b)
        .await
        .map_err(|err| match err {
            Error::NotFound(what) => ApiError::not_found(format!("{what} not found")),
            other => ApiError::internal(format!("analysis failed: {other}")),
        })?;

    Ok(ApiBody::success().field("analysis", analysis))
}
