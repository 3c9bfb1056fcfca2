//! Pluggable metric collectors. Each source implements the one-method
//! [`MetricsSource`] trait; the aggregator fans out to whichever sources
//! are enabled and treats a failed source as an empty contribution.

use std::collections::HashMap;

use async_trait::async_trait;

use resources::metrics::{NetworkMetrics, NodeMetrics, PodMetrics};
use resources::objects::uav::UavState;

mod network;
mod node;
mod uav;
mod workload;

pub use network::NetworkMetricsCollector;
pub use node::NodeMetricsCollector;
pub use uav::UavMetricsCollector;
pub use workload::PodMetricsCollector;

pub type NodeMetricsMap = HashMap<String, NodeMetrics>;
/// Keyed by `namespace/name`.
pub type PodMetricsMap = HashMap<String, PodMetrics>;
pub type NetworkMetricsList = Vec<NetworkMetrics>;
/// Keyed by the agent's host node name.
pub type UavStateMap = HashMap<String, UavState>;

#[async_trait]
pub trait MetricsSource: Send + Sync {
    type Output;

    async fn collect(&self) -> cluster::Result<Self::Output>;
}

pub type BoxedSource<T> = Box<dyn MetricsSource<Output = T>>;
