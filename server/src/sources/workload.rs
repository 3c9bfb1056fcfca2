//! Workload source: lists pods per configured namespace and joins the
//! realtime per-container usage feed. Aggregate requests/limits sum across
//! containers; container-level sums equal workload-level sums.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::{
    api::{Api, ApiResource, DynamicObject, GroupVersionKind, ListParams},
    Client,
};
use tracing::{debug, warn};

use cluster::quantity::{bytes, cpu_millis};
use resources::metrics::{ContainerMetrics, PodMetrics};

use super::{MetricsSource, PodMetricsMap};

/// Realtime usage for one container of a workload.
#[derive(Debug, Clone, Default)]
pub struct ContainerUsage {
    pub name: String,
    pub cpu: Quantity,
    pub memory: Quantity,
}

pub struct PodMetricsCollector {
    client: Client,
    namespaces: Vec<String>,
}

impl PodMetricsCollector {
    /// An empty namespace list collapses to `[""]`, meaning all namespaces.
    pub fn new(client: Client, namespaces: Vec<String>) -> Self {
        let namespaces = if namespaces.is_empty() {
            vec![String::new()]
        } else {
            namespaces
        };
        PodMetricsCollector { client, namespaces }
    }

    fn pods_api(&self, namespace: &str) -> Api<Pod> {
        if namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), namespace)
        }
    }

    fn usage_api(&self, namespace: &str) -> Api<DynamicObject> {
        let ar = ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk("metrics.k8s.io", "v1beta1", "PodMetrics"),
            "pods",
        );
        if namespace.is_empty() {
            Api::all_with(self.client.clone(), &ar)
        } else {
            Api::namespaced_with(self.client.clone(), namespace, &ar)
        }
    }

    async fn usage_by_pod(&self, namespace: &str) -> HashMap<String, Vec<ContainerUsage>> {
        match self.usage_api(namespace).list(&ListParams::default()).await {
            Ok(list) => list
                .items
                .into_iter()
                .filter_map(|item| {
                    let name = item.metadata.name.clone()?;
                    let containers = item.data.get("containers")?.as_array()?.to_vec();
                    let usage = containers
                        .iter()
                        .filter_map(|container| {
                            Some(ContainerUsage {
                                name: container.get("name")?.as_str()?.to_string(),
                                cpu: Quantity(
                                    container
                                        .get("usage")?
                                        .get("cpu")?
                                        .as_str()
                                        .unwrap_or_default()
                                        .to_string(),
                                ),
                                memory: Quantity(
                                    container
                                        .get("usage")?
                                        .get("memory")?
                                        .as_str()
                                        .unwrap_or_default()
                                        .to_string(),
                                ),
                            })
                        })
                        .collect();
                    Some((name, usage))
                })
                .collect(),
            Err(err) => {
                warn!(
                    "pod usage feed unavailable for namespace {:?}: {err} (metrics may be incomplete)",
                    namespace
                );
                HashMap::new()
            }
        }
    }

    async fn collect_namespace(&self, namespace: &str) -> cluster::Result<PodMetricsMap> {
        let pods = self.pods_api(namespace).list(&ListParams::default()).await?;
        let usage = self.usage_by_pod(namespace).await;

        Ok(pods
            .items
            .iter()
            .filter_map(|pod| {
                let name = pod.metadata.name.clone()?;
                let metrics = build_pod_metrics(pod, usage.get(&name).map(Vec::as_slice));
                Some((metrics.key(), metrics))
            })
            .collect())
    }
}

#[async_trait]
impl MetricsSource for PodMetricsCollector {
    type Output = PodMetricsMap;

    async fn collect(&self) -> cluster::Result<PodMetricsMap> {
        let mut result = PodMetricsMap::new();
        for namespace in &self.namespaces {
            match self.collect_namespace(namespace).await {
                Ok(map) => result.extend(map),
                Err(err) => {
                    warn!("failed to collect pod metrics for namespace {namespace:?}: {err}")
                }
            }
        }
        debug!("collected metrics for {} pods", result.len());
        Ok(result)
    }
}

/// Join one pod object with its usage feed entry. Without a feed entry the
/// usage stays zero and the container list empty.
pub fn build_pod_metrics(pod: &Pod, usage: Option<&[ContainerUsage]>) -> PodMetrics {
    let spec = pod.spec.as_ref();
    let status = pod.status.as_ref();

    let mut cpu_request = 0;
    let mut cpu_limit = 0;
    let mut memory_request = 0;
    let mut memory_limit = 0;
    for container in spec.map(|s| s.containers.as_slice()).unwrap_or_default() {
        let resources = container.resources.as_ref();
        let requests = resources.and_then(|r| r.requests.as_ref());
        let limits = resources.and_then(|r| r.limits.as_ref());
        cpu_request += requests.and_then(|r| r.get("cpu")).map(cpu_millis).unwrap_or(0);
        cpu_limit += limits.and_then(|l| l.get("cpu")).map(cpu_millis).unwrap_or(0);
        memory_request += requests.and_then(|r| r.get("memory")).map(bytes).unwrap_or(0);
        memory_limit += limits.and_then(|l| l.get("memory")).map(bytes).unwrap_or(0);
    }

    let mut cpu_usage = 0;
    let mut memory_usage = 0;
    let mut containers = Vec::new();
    for entry in usage.unwrap_or_default() {
        let container_cpu = cpu_millis(&entry.cpu);
        let container_memory = bytes(&entry.memory);
        cpu_usage += container_cpu;
        memory_usage += container_memory;

        let container_spec = spec
            .map(|s| s.containers.as_slice())
            .unwrap_or_default()
            .iter()
            .find(|c| c.name == entry.name);
        let resources = container_spec.and_then(|c| c.resources.as_ref());
        let requests = resources.and_then(|r| r.requests.as_ref());
        let limits = resources.and_then(|r| r.limits.as_ref());

        containers.push(ContainerMetrics {
            name: entry.name.clone(),
            cpu_usage: container_cpu,
            memory_usage: container_memory,
            cpu_request: requests.and_then(|r| r.get("cpu")).map(cpu_millis).unwrap_or(0),
            cpu_limit: limits.and_then(|l| l.get("cpu")).map(cpu_millis).unwrap_or(0),
            memory_request: requests.and_then(|r| r.get("memory")).map(bytes).unwrap_or(0),
            memory_limit: limits.and_then(|l| l.get("memory")).map(bytes).unwrap_or(0),
        });
    }

    let ready = status
        .and_then(|s| s.conditions.as_deref())
        .unwrap_or_default()
        .iter()
        .any(|c| c.type_ == "Ready" && c.status == "True");

    let restarts = status
        .and_then(|s| s.container_statuses.as_deref())
        .unwrap_or_default()
        .iter()
        .map(|cs| cs.restart_count)
        .sum();

    PodMetrics {
        pod_name: pod.metadata.name.clone().unwrap_or_default(),
        namespace: pod.metadata.namespace.clone().unwrap_or_default(),
        node_name: spec.and_then(|s| s.node_name.clone()).unwrap_or_default(),
        timestamp: Some(Utc::now()),

        cpu_usage,
        memory_usage,
        cpu_request,
        cpu_limit,
        memory_request,
        memory_limit,

        cpu_usage_rate: rate(cpu_usage, cpu_limit),
        memory_usage_rate: rate(memory_usage, memory_limit),

        containers,

        phase: status.and_then(|s| s.phase.clone()).unwrap_or_default(),
        ready,
        restarts,
        start_time: status.and_then(|s| s.start_time.as_ref()).map(|t| t.0),
    }
}

fn rate(usage: i64, limit: i64) -> f64 {
    if limit > 0 {
        usage as f64 / limit as f64 * 100.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pod() -> Pod {
        serde_json::from_value(json!({
            "metadata": {"name": "web", "namespace": "default"},
            "spec": {
                "nodeName": "node-a",
                "containers": [
                    {
                        "name": "nginx",
                        "resources": {
                            "requests": {"cpu": "100m", "memory": "128Mi"},
                            "limits": {"cpu": "200m", "memory": "256Mi"},
                        },
                    },
                    {
                        "name": "sidecar",
                        "resources": {
                            "requests": {"cpu": "50m", "memory": "64Mi"},
                            "limits": {"cpu": "100m", "memory": "128Mi"},
                        },
                    },
                ],
            },
            "status": {
                "phase": "Running",
                "conditions": [{"type": "Ready", "status": "True"}],
                "containerStatuses": [
                    {"name": "nginx", "ready": true, "restartCount": 2, "image": "", "imageID": ""},
                    {"name": "sidecar", "ready": true, "restartCount": 1, "image": "", "imageID": ""},
                ],
            },
        }))
        .unwrap()
    }

    fn usage() -> Vec<ContainerUsage> {
        vec![
            ContainerUsage {
                name: "nginx".into(),
                cpu: Quantity("150m".into()),
                memory: Quantity("100Mi".into()),
            },
            ContainerUsage {
                name: "sidecar".into(),
                cpu: Quantity("30m".into()),
                memory: Quantity("32Mi".into()),
            },
        ]
    }

    #[test]
    fn requests_and_limits_sum_across_containers() {
        let metrics = build_pod_metrics(&pod(), Some(&usage()));
        assert_eq!(metrics.cpu_request, 150);
        assert_eq!(metrics.cpu_limit, 300);
        assert_eq!(metrics.memory_request, 192 * 1024 * 1024);
        assert_eq!(metrics.memory_limit, 384 * 1024 * 1024);
    }

    #[test]
    fn container_sums_equal_workload_sums() {
        let metrics = build_pod_metrics(&pod(), Some(&usage()));
        let cpu_sum: i64 = metrics.containers.iter().map(|c| c.cpu_usage).sum();
        let memory_sum: i64 = metrics.containers.iter().map(|c| c.memory_usage).sum();
        assert_eq!(cpu_sum, metrics.cpu_usage);
        assert_eq!(memory_sum, metrics.memory_usage);
        assert_eq!(metrics.cpu_usage, 180);
        assert_eq!(metrics.memory_usage, 132 * 1024 * 1024);
    }

    #[test]
    fn usage_rate_is_relative_to_limit() {
        let metrics = build_pod_metrics(&pod(), Some(&usage()));
        assert_eq!(metrics.cpu_usage_rate, 60.0);
        assert!((metrics.memory_usage_rate - 34.375).abs() < 1e-9);
    }

    #[test]
    fn ready_and_restarts_derive_from_status() {
        let metrics = build_pod_metrics(&pod(), Some(&usage()));
        assert!(metrics.ready);
        assert_eq!(metrics.restarts, 3);
        assert_eq!(metrics.phase, "Running");
        assert_eq!(metrics.key(), "default/web");
    }

    #[test]
    fn missing_usage_feed_leaves_zero_usage_and_no_containers() {
        let metrics = build_pod_metrics(&pod(), None);
        assert_eq!(metrics.cpu_usage, 0);
        assert!(metrics.containers.is_empty());
        assert_eq!(metrics.cpu_usage_rate, 0.0);
        // Requests/limits still come from the spec.
        assert_eq!(metrics.cpu_request, 150);
    }
}
