use std::sync::Arc;

use cluster::ClusterClient;

use crate::aggregator::MetricsAggregator;

pub mod aggregator;
pub mod handler;
pub mod sources;
pub mod state_handler;

/// Shared handler state. Either half may be absent: the façade degrades to
/// warnings and 503s instead of failing to start.
pub struct AppState {
    pub client: Option<Arc<ClusterClient>>,
    pub aggregator: Option<Arc<MetricsAggregator>>,
}
