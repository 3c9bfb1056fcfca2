//! Node source: joins node objects (capacity, conditions, labels) with the
//! realtime usage feed. An absent usage feed degrades to capacity-only
//! metrics, it is not an error.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::{
    api::{Api, ApiResource, DynamicObject, GroupVersionKind, ListParams},
    Client,
};
use tracing::{debug, warn};

use cluster::quantity::{bytes, cpu_millis};
use resources::metrics::NodeMetrics;

use super::{MetricsSource, NodeMetricsMap};

/// Realtime CPU/memory reading for one node.
#[derive(Debug, Clone, Default)]
pub struct NodeUsage {
    pub cpu: Quantity,
    pub memory: Quantity,
}

pub struct NodeMetricsCollector {
    client: Client,
}

impl NodeMetricsCollector {
    pub fn new(client: Client) -> Self {
        NodeMetricsCollector { client }
    }

    async fn usage_by_node(&self) -> HashMap<String, NodeUsage> {
        let ar = ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk("metrics.k8s.io", "v1beta1", "NodeMetrics"),
            "nodes",
        );
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &ar);

        match api.list(&ListParams::default()).await {
            Ok(list) => list
                .items
                .into_iter()
                .filter_map(|item| {
                    let name = item.metadata.name.clone()?;
                    let usage = item.data.get("usage")?;
                    Some((
                        name,
                        NodeUsage {
                            cpu: Quantity(
                                usage.get("cpu")?.as_str().unwrap_or_default().to_string(),
                            ),
                            memory: Quantity(
                                usage.get("memory")?.as_str().unwrap_or_default().to_string(),
                            ),
                        },
                    ))
                })
                .collect(),
            Err(err) => {
                warn!("node usage feed unavailable: {err} (metrics may be incomplete)");
                HashMap::new()
            }
        }
    }
}

#[async_trait]
impl MetricsSource for NodeMetricsCollector {
    type Output = NodeMetricsMap;

    async fn collect(&self) -> cluster::Result<NodeMetricsMap> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes.list(&ListParams::default()).await?;
        let usage = self.usage_by_node().await;

        let result: NodeMetricsMap = list
            .items
            .iter()
            .filter_map(|node| {
                let name = node.metadata.name.clone()?;
                let metrics = build_node_metrics(node, usage.get(&name));
                Some((name, metrics))
            })
            .collect();

        debug!("collected metrics for {} nodes", result.len());
        Ok(result)
    }
}

/// Join one node object with its usage reading. GPU fields stay empty;
/// they are passthroughs for CRD-fed extensions.
pub fn build_node_metrics(node: &Node, usage: Option<&NodeUsage>) -> NodeMetrics {
    let status = node.status.as_ref();
    let capacity = status.and_then(|s| s.capacity.as_ref());
    let allocatable = status.and_then(|s| s.allocatable.as_ref());

    let cpu_capacity = capacity
        .and_then(|c| c.get("cpu"))
        .map(cpu_millis)
        .unwrap_or(0);
    let memory_capacity = capacity
        .and_then(|c| c.get("memory"))
        .map(bytes)
        .unwrap_or(0);
    let disk_capacity = capacity
        .and_then(|c| c.get("ephemeral-storage"))
        .map(bytes)
        .unwrap_or(0);

    let cpu_usage = usage.map(|u| cpu_millis(&u.cpu)).unwrap_or(0);
    let memory_usage = usage.map(|u| bytes(&u.memory)).unwrap_or(0);

    // No direct disk reading; approximate as capacity - allocatable,
    // clamped at zero.
    let disk_usage = allocatable
        .and_then(|a| a.get("ephemeral-storage"))
        .map(|q| (disk_capacity - bytes(q)).max(0))
        .unwrap_or(0);

    let mut healthy = true;
    let mut conditions = Vec::new();
    for condition in status
        .and_then(|s| s.conditions.as_deref())
        .unwrap_or_default()
    {
        let message = condition.message.as_deref().unwrap_or_default();
        if condition.type_ == "Ready" {
            if condition.status != "True" {
                healthy = false;
                conditions.push(format!("NotReady: {message}"));
            }
        } else if condition.status == "True"
            && matches!(
                condition.type_.as_str(),
                "MemoryPressure" | "DiskPressure" | "PIDPressure" | "NetworkUnavailable"
            )
        {
            healthy = false;
            conditions.push(format!("{}: {message}", condition.type_));
        }
    }

    NodeMetrics {
        node_name: node.metadata.name.clone().unwrap_or_default(),
        timestamp: Some(Utc::now()),

        cpu_capacity,
        cpu_usage,
        cpu_usage_rate: rate(cpu_usage, cpu_capacity),

        memory_capacity,
        memory_usage,
        memory_usage_rate: rate(memory_usage, memory_capacity),

        disk_capacity,
        disk_usage,
        disk_usage_rate: rate(disk_usage, disk_capacity),

        healthy,
        conditions,
        labels: node
            .metadata
            .labels
            .as_ref()
            .map(|l| l.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default(),

        ..Default::default()
    }
}

fn rate(usage: i64, capacity: i64) -> f64 {
    if capacity > 0 {
        usage as f64 / capacity as f64 * 100.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(conditions: serde_json::Value) -> Node {
        serde_json::from_value(json!({
            "metadata": {"name": "node-a", "labels": {"zone": "edge"}},
            "status": {
                "capacity": {"cpu": "4", "memory": "8Gi", "ephemeral-storage": "100Gi"},
                "allocatable": {"cpu": "4", "memory": "8Gi", "ephemeral-storage": "90Gi"},
                "conditions": conditions,
            },
        }))
        .unwrap()
    }

    fn ready_conditions() -> serde_json::Value {
        json!([{"type": "Ready", "status": "True"}])
    }

    #[test]
    fn capacity_and_usage_are_normalized() {
        let usage = NodeUsage {
            cpu: Quantity("500m".into()),
            memory: Quantity("2Gi".into()),
        };
        let metrics = build_node_metrics(&node(ready_conditions()), Some(&usage));

        assert_eq!(metrics.cpu_capacity, 4000);
        assert_eq!(metrics.cpu_usage, 500);
        assert_eq!(metrics.cpu_usage_rate, 12.5);
        assert_eq!(metrics.memory_capacity, 8 * 1024 * 1024 * 1024);
        assert_eq!(metrics.memory_usage_rate, 25.0);
        // 100Gi - 90Gi
        assert_eq!(metrics.disk_usage, 10 * 1024 * 1024 * 1024);
        assert_eq!(metrics.disk_usage_rate, 10.0);
        assert!(metrics.healthy);
        assert_eq!(metrics.labels.get("zone").map(String::as_str), Some("edge"));
    }

    #[test]
    fn missing_usage_feed_degrades_to_zero_usage() {
        let metrics = build_node_metrics(&node(ready_conditions()), None);
        assert_eq!(metrics.cpu_usage, 0);
        assert_eq!(metrics.cpu_usage_rate, 0.0);
        assert_eq!(metrics.cpu_capacity, 4000);
    }

    #[test]
    fn pressure_conditions_make_the_node_unhealthy() {
        let metrics = build_node_metrics(
            &node(json!([
                {"type": "Ready", "status": "True"},
                {"type": "MemoryPressure", "status": "True", "message": "memory low"},
            ])),
            None,
        );
        assert!(!metrics.healthy);
        assert_eq!(metrics.conditions, vec!["MemoryPressure: memory low"]);
    }

    #[test]
    fn not_ready_makes_the_node_unhealthy() {
        let metrics = build_node_metrics(
            &node(json!([{"type": "Ready", "status": "False", "message": "kubelet down"}])),
            None,
        );
        assert!(!metrics.healthy);
        assert_eq!(metrics.conditions, vec!["NotReady: kubelet down"]);
    }

    #[test]
    fn zero_capacity_yields_zero_rates() {
        let bare: Node = serde_json::from_value(json!({"metadata": {"name": "node-b"}})).unwrap();
        let metrics = build_node_metrics(&bare, None);
        assert_eq!(metrics.cpu_usage_rate, 0.0);
        assert_eq!(metrics.memory_usage_rate, 0.0);
        assert_eq!(metrics.disk_usage_rate, 0.0);
    }
}
