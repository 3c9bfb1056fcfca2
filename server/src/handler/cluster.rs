use std::sync::Arc;

use axum::Extension;
use tracing::warn;

use resources::models::ApiBody;

use crate::AppState;

pub async fn cluster_status(Extension(state): Extension<Arc<AppState>>) -> ApiBody {
    let Some(client) = state.client.as_ref() else {
        return ApiBody::warning("cluster access not available - running in development mode");
    };

    match client.cluster_info().await {
        Ok(info) => ApiBody::success().field("cluster_info", info),
        Err(err) => {
            warn!("failed to get cluster info: {err}");
            ApiBody::warning(format!("failed to get cluster info: {err}"))
        }
    }
}
