use std::collections::BTreeMap;

use futures::join;
use k8s_openapi::api::core::v1::{Event, Node, Pod, Service};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use kube::{
    api::{
        Api, ApiResource, AttachParams, DynamicObject, GroupVersionKind, ListParams, LogParams,
        Patch, PatchParams, PostParams,
    },
    config::{KubeConfigOptions, Kubeconfig},
    Client, Config,
};
use serde::Serialize;
use serde_json::json;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use resources::config::{parse_watch_namespaces, K8sConfig};
use resources::objects::uav::UavReport;
use resources::objects::{CustomResourceInfo, EventInfo, NetworkPolicyInfo, PodInfo, ServiceInfo};

use crate::convert;
use crate::{Error, Result};

/// Dynamic handle for the persisted UAV telemetry kind.
pub fn uav_metric_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("monitoring.io", "v1", "UAVMetric"),
        "uavmetrics",
    )
}

/// Dynamic handle for scheduling requests.
pub fn scheduling_request_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("scheduler.io", "v1", "SchedulingRequest"),
        "schedulingrequests",
    )
}

#[derive(Debug, Serialize, Clone)]
pub struct ClusterInfo {
    pub version: String,
    pub nodes: usize,
    pub pods: usize,
    pub namespaces: Vec<String>,
}

/// Stateless gateway to the cluster. The only component that talks to the
/// API server; everything else composes on top of it.
#[derive(Clone)]
pub struct ClusterClient {
    client: Client,
    namespaces: Vec<String>,
    uav_namespace: String,
}

impl ClusterClient {
    /// Build from configuration: an explicit kubeconfig path when given,
    /// in-cluster credentials otherwise.
    pub async fn new(cfg: &K8sConfig) -> Result<Self> {
        let config = if cfg.kubeconfig.is_empty() {
            Config::infer()
                .await
                .map_err(|err| Error::Unreachable(err.to_string()))?
        } else {
            let kubeconfig = Kubeconfig::read_from(&cfg.kubeconfig)?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?
        };
        let client = Client::try_from(config)?;

        let uav_namespace = if cfg.namespace.is_empty() {
            "default".to_string()
        } else {
            cfg.namespace.clone()
        };

        Ok(ClusterClient {
            client,
            namespaces: parse_watch_namespaces(&cfg.watch_namespaces),
            uav_namespace,
        })
    }

    /// Handle for components that build their own typed sub-clients.
    pub fn kube(&self) -> Client {
        self.client.clone()
    }

    pub fn namespaces(&self) -> &[String] {
        &self.namespaces
    }

    pub fn uav_namespace(&self) -> &str {
        &self.uav_namespace
    }

    /// Fails with `Unreachable` when the version endpoint does not answer.
    pub async fn test_connection(&self) -> Result<()> {
        let version = self
            .client
            .apiserver_version()
            .await
            .map_err(|err| Error::Unreachable(err.to_string()))?;
        info!("connected to cluster {}", version.git_version);
        Ok(())
    }

    /// Version, node count and workload count summed across the watched
    /// namespaces. A namespace that fails to list logs a warning and is
    /// skipped.
    pub async fn cluster_info(&self) -> Result<ClusterInfo> {
        let version = self
            .client
            .apiserver_version()
            .await
            .map_err(|err| Error::Unreachable(err.to_string()))?;

        let nodes: Api<Node> = Api::all(self.client.clone());
        let node_count = nodes.list(&ListParams::default()).await?.items.len();

        let mut pod_count = 0;
        for namespace in &self.namespaces {
            let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
            match pods.list(&ListParams::default()).await {
                Ok(list) => pod_count += list.items.len(),
                Err(err) => warn!("failed to list pods in namespace {namespace}: {err}"),
            }
        }

        Ok(ClusterInfo {
            version: version.git_version,
            nodes: node_count,
            pods: pod_count,
            namespaces: self.namespaces.clone(),
        })
    }

    pub async fn get_pods(&self, namespace: &str) -> Result<Vec<PodInfo>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods.list(&ListParams::default()).await?;
        Ok(list.items.iter().map(convert::pod_to_info).collect())
    }

    pub async fn get_pod(&self, namespace: &str, name: &str) -> Result<PodInfo> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match pods.get(name).await {
            Ok(pod) => Ok(convert::pod_to_info(&pod)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                Err(Error::NotFound(format!("pod {namespace}/{name}")))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get_services(&self, namespace: &str) -> Result<Vec<ServiceInfo>> {
        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let list = services.list(&ListParams::default()).await?;
        Ok(list.items.iter().map(convert::service_to_info).collect())
    }

    pub async fn get_events(&self, namespace: &str, limit: u32) -> Result<Vec<EventInfo>> {
        let events: Api<Event> = Api::namespaced(self.client.clone(), namespace);
        let list = events
            .list(&ListParams::default().limit(limit))
            .await?;
        Ok(list.items.iter().map(convert::event_to_info).collect())
    }

    pub async fn get_network_policies(&self, namespace: &str) -> Result<Vec<NetworkPolicyInfo>> {
        let policies: Api<NetworkPolicy> = Api::namespaced(self.client.clone(), namespace);
        let list = policies.list(&ListParams::default()).await?;
        Ok(list
            .items
            .iter()
            .map(convert::network_policy_to_info)
            .collect())
    }

    pub async fn get_pod_logs(&self, namespace: &str, name: &str, tail_lines: i64) -> Result<String> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            tail_lines: Some(tail_lines),
            ..Default::default()
        };
        Ok(pods.logs(name, &params).await?)
    }

    fn dynamic_api(&self, ar: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) if !ns.is_empty() && !ns.eq_ignore_ascii_case("all") => {
                Api::namespaced_with(self.client.clone(), ns, ar)
            }
            _ => Api::all_with(self.client.clone(), ar),
        }
    }

    /// Generic list over a custom kind. `namespace` of `None`, `""` or
    /// `"all"` spans all namespaces.
    pub async fn list_custom_resources(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        let api = self.dynamic_api(ar, namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    /// Persisted UAV telemetry resources as domain records.
    pub async fn list_uav_metrics(&self, namespace: Option<&str>) -> Result<Vec<CustomResourceInfo>> {
        let ar = uav_metric_resource();
        let items = self.list_custom_resources(&ar, namespace).await?;
        Ok(items
            .iter()
            .map(|obj| convert::dynamic_to_custom_resource(obj, "monitoring.io", "UAVMetric"))
            .collect())
    }

    /// Merge-patch the status of a custom resource instance.
    pub async fn patch_custom_resource_status(
        &self,
        ar: &ApiResource,
        namespace: &str,
        name: &str,
        status: serde_json::Value,
    ) -> Result<()> {
        let api = self.dynamic_api(ar, Some(namespace));
        api.patch_status(
            name,
            &PatchParams::default(),
            &Patch::Merge(json!({ "status": status })),
        )
        .await?;
        Ok(())
    }

    /// Create-if-absent / update-otherwise for the UAVMetric mirroring an
    /// ingested report. The resource name is stable per node.
    pub async fn upsert_uav_metric(
        &self,
        namespace: Option<&str>,
        report: &UavReport,
    ) -> Result<()> {
        if report.node_name.is_empty() {
            return Err(Error::InvalidInput("uav report missing node name".into()));
        }

        let namespace = match namespace {
            Some(ns) if !ns.is_empty() => ns.to_string(),
            _ => self.uav_namespace.clone(),
        };

        let ar = uav_metric_resource();
        let desired = build_uav_metric_object(report, &namespace, &ar);
        let name = desired.metadata.name.clone().unwrap_or_default();
        let api = self.dynamic_api(&ar, Some(&namespace));

        match api.get(&name).await {
            Ok(mut existing) => {
                existing.data["spec"] = desired.data["spec"].clone();
                existing.data["status"] = desired.data["status"].clone();
                let labels = existing.metadata.labels.get_or_insert_with(BTreeMap::new);
                if let Some(desired_labels) = desired.metadata.labels.as_ref() {
                    for (key, value) in desired_labels {
                        labels.insert(key.clone(), value.clone());
                    }
                }
                api.replace(&name, &PostParams::default(), &existing).await?;
                debug!("updated UAVMetric {namespace}/{name}");
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                api.create(&PostParams::default(), &desired).await?;
                debug!("created UAVMetric {namespace}/{name}");
            }
            Err(err) => return Err(err.into()),
        }

        Ok(())
    }

    /// Run a command inside a workload container via the cluster exec
    /// channel. Uses the first container on the spec when none is named.
    pub async fn exec_in_pod(
        &self,
        namespace: &str,
        pod_name: &str,
        container: Option<&str>,
        command: &[&str],
    ) -> Result<(String, String)> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);

        let container = match container {
            Some(name) => name.to_string(),
            None => {
                let pod = pods.get(pod_name).await.map_err(|err| match err {
                    kube::Error::Api(ae) if ae.code == 404 => {
                        Error::NotFound(format!("pod {namespace}/{pod_name}"))
                    }
                    other => other.into(),
                })?;
                pod.spec
                    .as_ref()
                    .and_then(|spec| spec.containers.first())
                    .map(|c| c.name.clone())
                    .ok_or_else(|| {
                        Error::Exec(format!("no containers found in pod {pod_name}"))
                    })?
            }
        };

        let params = AttachParams::default()
            .container(container)
            .stdout(true)
            .stderr(true);
        let mut attached = pods.exec(pod_name, command.to_vec(), &params).await?;

        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();
        let stdout = attached.stdout();
        let stderr = attached.stderr();
        join!(
            async {
                if let Some(mut reader) = stdout {
                    let _ = reader.read_to_end(&mut stdout_buf).await;
                }
            },
            async {
                if let Some(mut reader) = stderr {
                    let _ = reader.read_to_end(&mut stderr_buf).await;
                }
            }
        );
        attached
            .join()
            .await
            .map_err(|err| Error::Exec(err.to_string()))?;

        Ok((
            String::from_utf8_lossy(&stdout_buf).into_owned(),
            String::from_utf8_lossy(&stderr_buf).into_owned(),
        ))
    }
}

/// Stable resource name component: lowercased, `_`/`.` mapped to `-`,
/// `unknown` when nothing is left.
pub fn sanitize_resource_name(name: &str) -> String {
    let sanitized = name.to_lowercase().replace(['_', '.'], "-").trim().to_string();
    if sanitized.is_empty() {
        "unknown".to_string()
    } else {
        sanitized
    }
}

/// Desired state of the UAVMetric resource mirroring a report.
pub fn build_uav_metric_object(
    report: &UavReport,
    namespace: &str,
    ar: &ApiResource,
) -> DynamicObject {
    let name = format!("uavmetric-{}", sanitize_resource_name(&report.node_name));

    let mut spec = json!({
        "node_name": report.node_name,
        "uav_id": report.uav_id,
    });
    if let Some(state) = report.state.as_ref() {
        spec["gps"] = json!({
            "latitude": state.gps.latitude,
            "longitude": state.gps.longitude,
            "altitude": state.gps.altitude,
            "relative_altitude": state.gps.relative_altitude,
            "satellite_count": state.gps.satellite_count,
            "fix_type": state.gps.fix_type,
        });
        spec["battery"] = json!({
            "voltage": state.battery.voltage,
            "remaining_percent": state.battery.remaining_percent,
            "remaining_capacity": state.battery.remaining_capacity,
            "temperature": state.battery.temperature,
        });
        spec["flight"] = json!({
            "mode": state.flight.mode,
            "armed": state.flight.armed,
            "ground_speed": state.flight.ground_speed,
            "vertical_speed": state.flight.vertical_speed,
        });
        spec["health"] = json!({
            "system_status": state.health.system_status,
            "error_count": state.health.error_count,
            "warning_count": state.health.warning_count,
        });
    }

    let timestamp = report
        .timestamp
        .unwrap_or_else(chrono::Utc::now)
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let status = if report.status.is_empty() {
        "active"
    } else {
        &report.status
    };

    let mut labels = BTreeMap::from([
        ("app".to_string(), "uav-agent".to_string()),
        (
            "monitoring.io/component".to_string(),
            "uav-metrics".to_string(),
        ),
        (
            "monitoring.io/node".to_string(),
            sanitize_resource_name(&report.node_name),
        ),
    ]);
    if !report.uav_id.is_empty() {
        labels.insert(
            "monitoring.io/uav-id".to_string(),
            sanitize_resource_name(&report.uav_id),
        );
    }
    if !report.node_ip.is_empty() {
        labels.insert("monitoring.io/node-ip".to_string(), report.node_ip.clone());
    }

    let mut obj = DynamicObject::new(&name, ar).within(namespace);
    obj.metadata.labels = Some(labels);
    obj.data = json!({
        "spec": spec,
        "status": {
            "last_update": timestamp,
            "collection_status": status,
        },
    });
    obj
}

#[cfg(test)]
mod tests {
    use super::*;
    use resources::objects::uav::{BatteryData, UavState};

    #[test]
    fn resource_names_are_sanitized() {
        assert_eq!(sanitize_resource_name("Node_A.local"), "node-a-local");
        assert_eq!(sanitize_resource_name(""), "unknown");
        assert_eq!(sanitize_resource_name("  "), "unknown");
    }

    #[test]
    fn uav_metric_object_mirrors_the_report() {
        let report = UavReport {
            node_name: "Node_A".into(),
            node_ip: "10.0.0.5".into(),
            uav_id: "uav-node-a".into(),
            status: "active".into(),
            state: Some(UavState {
                battery: BatteryData {
                    remaining_percent: 61.5,
                    voltage: 15.1,
                    ..Default::default()
                },
                ..Default::default()
            }),
            ..Default::default()
        };

        let ar = uav_metric_resource();
        let obj = build_uav_metric_object(&report, "default", &ar);
        assert_eq!(obj.metadata.name.as_deref(), Some("uavmetric-node-a"));
        assert_eq!(obj.metadata.namespace.as_deref(), Some("default"));
        assert_eq!(obj.data["spec"]["node_name"], "Node_A");
        assert_eq!(obj.data["spec"]["battery"]["remaining_percent"], 61.5);
        assert_eq!(obj.data["status"]["collection_status"], "active");

        let labels = obj.metadata.labels.unwrap();
        assert_eq!(labels.get("app").map(String::as_str), Some("uav-agent"));
        assert_eq!(
            labels.get("monitoring.io/node").map(String::as_str),
            Some("node-a")
        );
        assert_eq!(
            labels.get("monitoring.io/node-ip").map(String::as_str),
            Some("10.0.0.5")
        );
    }

    #[test]
    fn missing_state_keeps_spec_minimal() {
        let report = UavReport {
            node_name: "node-b".into(),
            uav_id: "uav-node-b".into(),
            ..Default::default()
        };
        let ar = uav_metric_resource();
        let obj = build_uav_metric_object(&report, "default", &ar);
        assert!(obj.data["spec"].get("battery").is_none());
        assert_eq!(obj.data["status"]["collection_status"], "active");
    }
}
