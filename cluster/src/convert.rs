//! Total conversions from cluster objects to domain records. A missing
//! field becomes a zero value, never an error.

use std::collections::HashMap;

use k8s_openapi::api::core::v1::{ContainerStatus, Event, Pod, Service};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::DynamicObject;

use resources::objects::{
    ContainerInfo, ContainerState, CrdInfo, CustomResourceInfo, EventInfo, NetworkPolicyInfo,
    NetworkPolicyRule, PodInfo, PortRule, ServiceInfo, ServicePort,
};

pub fn pod_to_info(pod: &Pod) -> PodInfo {
    let metadata = &pod.metadata;
    let status = pod.status.as_ref();
    let spec = pod.spec.as_ref();

    let container_statuses = status
        .and_then(|s| s.container_statuses.as_deref())
        .unwrap_or_default();

    let containers = spec
        .map(|s| {
            s.containers
                .iter()
                .map(|container| {
                    let cs = container_statuses
                        .iter()
                        .find(|cs| cs.name == container.name);
                    let mut env = HashMap::new();
                    for var in container.env.as_deref().unwrap_or_default() {
                        if let Some(value) = var.value.as_deref() {
                            if !value.is_empty() {
                                env.insert(var.name.clone(), value.to_string());
                            }
                        }
                    }
                    ContainerInfo {
                        name: container.name.clone(),
                        image: container.image.clone().unwrap_or_default(),
                        state: container_state(cs),
                        ready: cs.map(|cs| cs.ready).unwrap_or(false),
                        env,
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    PodInfo {
        name: metadata.name.clone().unwrap_or_default(),
        namespace: metadata.namespace.clone().unwrap_or_default(),
        status: status
            .and_then(|s| s.phase.clone())
            .unwrap_or_else(|| "Unknown".to_string()),
        node_name: spec.and_then(|s| s.node_name.clone()).unwrap_or_default(),
        ip: status.and_then(|s| s.pod_ip.clone()).unwrap_or_default(),
        labels: metadata
            .labels
            .as_ref()
            .map(|l| l.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default(),
        start_time: status.and_then(|s| s.start_time.as_ref()).map(|t| t.0),
        containers,
    }
}

fn container_state(status: Option<&ContainerStatus>) -> ContainerState {
    let Some(state) = status.and_then(|s| s.state.as_ref()) else {
        return ContainerState::Unknown;
    };
    if state.running.is_some() {
        ContainerState::Running
    } else if state.waiting.is_some() {
        ContainerState::Waiting
    } else if state.terminated.is_some() {
        ContainerState::Terminated
    } else {
        ContainerState::Unknown
    }
}

pub fn service_to_info(svc: &Service) -> ServiceInfo {
    let spec = svc.spec.as_ref();
    ServiceInfo {
        name: svc.metadata.name.clone().unwrap_or_default(),
        namespace: svc.metadata.namespace.clone().unwrap_or_default(),
        r#type: spec.and_then(|s| s.type_.clone()).unwrap_or_default(),
        cluster_ip: spec.and_then(|s| s.cluster_ip.clone()).unwrap_or_default(),
        ports: spec
            .and_then(|s| s.ports.as_ref())
            .map(|ports| {
                ports
                    .iter()
                    .map(|p| ServicePort {
                        name: p.name.clone().unwrap_or_default(),
                        port: p.port,
                        protocol: p.protocol.clone().unwrap_or_default(),
                    })
                    .collect()
            })
            .unwrap_or_default(),
        selector: spec
            .and_then(|s| s.selector.as_ref())
            .map(|sel| sel.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default(),
    }
}

pub fn event_to_info(event: &Event) -> EventInfo {
    EventInfo {
        r#type: event.type_.clone().unwrap_or_default(),
        reason: event.reason.clone().unwrap_or_default(),
        message: event.message.clone().unwrap_or_default(),
        source: event
            .source
            .as_ref()
            .and_then(|s| s.component.clone())
            .unwrap_or_default(),
        timestamp: event.last_timestamp.as_ref().map(|t| t.0),
        count: event.count.unwrap_or(0),
    }
}

pub fn network_policy_to_info(policy: &NetworkPolicy) -> NetworkPolicyInfo {
    let spec = policy.spec.as_ref();
    NetworkPolicyInfo {
        name: policy.metadata.name.clone().unwrap_or_default(),
        namespace: policy.metadata.namespace.clone().unwrap_or_default(),
        pod_selector: spec
            .and_then(|s| s.pod_selector.match_labels.as_ref())
            .map(|l| l.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default(),
        ingress: spec
            .and_then(|s| s.ingress.as_ref())
            .map(|rules| {
                rules
                    .iter()
                    .map(|rule| NetworkPolicyRule {
                        ports: port_rules(rule.ports.as_deref()),
                    })
                    .collect()
            })
            .unwrap_or_default(),
        egress: spec
            .and_then(|s| s.egress.as_ref())
            .map(|rules| {
                rules
                    .iter()
                    .map(|rule| NetworkPolicyRule {
                        ports: port_rules(rule.ports.as_deref()),
                    })
                    .collect()
            })
            .unwrap_or_default(),
    }
}

fn port_rules(
    ports: Option<&[k8s_openapi::api::networking::v1::NetworkPolicyPort]>,
) -> Vec<PortRule> {
    ports
        .unwrap_or_default()
        .iter()
        .map(|p| PortRule {
            protocol: p.protocol.clone().unwrap_or_default(),
            port: match p.port.as_ref() {
                Some(IntOrString::Int(i)) => *i,
                _ => 0,
            },
        })
        .collect()
}

pub fn crd_to_info(crd: &CustomResourceDefinition) -> CrdInfo {
    let established = crd
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Established" && c.status == "True")
        })
        .unwrap_or(false);

    CrdInfo {
        name: crd.metadata.name.clone().unwrap_or_default(),
        group: crd.spec.group.clone(),
        kind: crd.spec.names.kind.clone(),
        scope: crd.spec.scope.clone(),
        versions: crd.spec.versions.iter().map(|v| v.name.clone()).collect(),
        plural: crd.spec.names.plural.clone(),
        singular: crd.spec.names.singular.clone().unwrap_or_default(),
        established,
        stored: crd
            .status
            .as_ref()
            .map(|s| !s.stored_versions.as_deref().unwrap_or_default().is_empty())
            .unwrap_or(false),
        creation_time: crd.metadata.creation_timestamp.as_ref().map(|t| t.0),
    }
}

pub fn dynamic_to_custom_resource(
    obj: &DynamicObject,
    group: &str,
    kind: &str,
) -> CustomResourceInfo {
    let section = |key: &str| {
        obj.data
            .get(key)
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default()
    };

    CustomResourceInfo {
        kind: kind.to_string(),
        name: obj.metadata.name.clone().unwrap_or_default(),
        namespace: obj.metadata.namespace.clone().unwrap_or_default(),
        group: group.to_string(),
        version: obj
            .types
            .as_ref()
            .map(|t| t.api_version.clone())
            .unwrap_or_default(),
        spec: section("spec"),
        status: section("status"),
        generation: obj.metadata.generation.unwrap_or(0),
        creation_time: obj.metadata.creation_timestamp.as_ref().map(|t| t.0),
        update_time: last_update_time(obj),
    }
}

/// Newest managed-fields timestamp, falling back to creation time.
fn last_update_time(obj: &DynamicObject) -> Option<chrono::DateTime<chrono::Utc>> {
    obj.metadata
        .managed_fields
        .as_ref()
        .and_then(|fields| fields.first())
        .and_then(|entry| entry.time.as_ref())
        .map(|t| t.0)
        .or_else(|| obj.metadata.creation_timestamp.as_ref().map(|t| t.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pod_conversion_extracts_containers_and_env() {
        let pod: Pod = serde_json::from_value(json!({
            "metadata": {
                "name": "nginx",
                "namespace": "default",
                "labels": {"app": "nginx"},
            },
            "spec": {
                "nodeName": "node-a",
                "containers": [{
                    "name": "nginx",
                    "image": "nginx:1.25",
                    "env": [
                        {"name": "PORT", "value": "80"},
                        {"name": "SECRET", "valueFrom": {"secretKeyRef": {"name": "s", "key": "k"}}},
                        {"name": "EMPTY", "value": ""},
                    ],
                }],
            },
            "status": {
                "phase": "Running",
                "podIP": "10.244.0.10",
                "startTime": "2025-06-01T10:00:00Z",
                "containerStatuses": [{
                    "name": "nginx",
                    "ready": true,
                    "restartCount": 0,
                    "image": "nginx:1.25",
                    "imageID": "",
                    "state": {"running": {"startedAt": "2025-06-01T10:00:01Z"}},
                }],
            },
        }))
        .unwrap();

        let info = pod_to_info(&pod);
        assert_eq!(info.key(), "default/nginx");
        assert_eq!(info.status, "Running");
        assert_eq!(info.node_name, "node-a");
        assert_eq!(info.ip, "10.244.0.10");
        assert_eq!(info.containers.len(), 1);
        let container = &info.containers[0];
        assert_eq!(container.state, ContainerState::Running);
        assert!(container.ready);
        assert_eq!(container.env.len(), 1);
        assert_eq!(container.env.get("PORT"), Some(&"80".to_string()));
    }

    #[test]
    fn pod_conversion_is_total_on_empty_object() {
        let pod = Pod::default();
        let info = pod_to_info(&pod);
        assert_eq!(info.name, "");
        assert_eq!(info.status, "Unknown");
        assert!(info.containers.is_empty());
        assert!(info.start_time.is_none());
    }

    #[test]
    fn service_conversion_keeps_ports_and_selector() {
        let svc: Service = serde_json::from_value(json!({
            "metadata": {"name": "web", "namespace": "default"},
            "spec": {
                "type": "ClusterIP",
                "clusterIP": "10.96.0.20",
                "selector": {"app": "nginx"},
                "ports": [{"name": "http", "port": 80, "protocol": "TCP"}],
            },
        }))
        .unwrap();

        let info = service_to_info(&svc);
        assert_eq!(info.r#type, "ClusterIP");
        assert_eq!(info.cluster_ip, "10.96.0.20");
        assert_eq!(info.ports, vec![ServicePort {
            name: "http".into(),
            port: 80,
            protocol: "TCP".into(),
        }]);
        assert_eq!(info.selector.get("app"), Some(&"nginx".to_string()));
    }

    #[test]
    fn crd_conversion_reads_established_condition() {
        let crd: CustomResourceDefinition = serde_json::from_value(json!({
            "metadata": {"name": "uavmetrics.monitoring.io"},
            "spec": {
                "group": "monitoring.io",
                "names": {"kind": "UAVMetric", "plural": "uavmetrics", "singular": "uavmetric"},
                "scope": "Namespaced",
                "versions": [{"name": "v1", "served": true, "storage": true}],
            },
            "status": {
                "conditions": [{"type": "Established", "status": "True"}],
                "storedVersions": ["v1"],
            },
        }))
        .unwrap();

        let info = crd_to_info(&crd);
        assert_eq!(info.group, "monitoring.io");
        assert_eq!(info.plural, "uavmetrics");
        assert!(info.established);
        assert!(info.stored);
        assert_eq!(info.versions, vec!["v1"]);
    }
}
