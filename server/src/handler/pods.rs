use std::sync::Arc;

use axum::Extension;
use tracing::warn;

use resources::models::ApiBody;
use resources::objects::PodInfo;

use crate::AppState;

/// Workloads across all watched namespaces. Degrades to an empty list when
/// cluster access is missing.
pub async fn list_pods(Extension(state): Extension<Arc<AppState>>) -> ApiBody {
    let Some(client) = state.client.as_ref() else {
        return ApiBody::warning("cluster access not available - running in development mode")
            .field("pods", Vec::<PodInfo>::new())
            .field("count", 0);
    };

    let mut all_pods = Vec::new();
    for namespace in client.namespaces() {
        match client.get_pods(namespace).await {
            Ok(pods) => all_pods.extend(pods),
            Err(err) => warn!("failed to get pods from namespace {namespace}: {err}"),
        }
    }

    let count = all_pods.len();
    ApiBody::success().field("pods", all_pods).field("count", count)
}
