use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::Display;

pub mod scheduling;
pub mod uav;

/// A workload (pod) as seen by the rest of the system. Conversion from the
/// cluster representation is total: missing fields become empty values.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct PodInfo {
    pub name: String,
    pub namespace: String,
    /// Phase string as reported by the cluster: Running, Pending, Failed,
    /// Succeeded or Unknown.
    pub status: String,
    pub node_name: String,
    /// Assigned IP; empty until the workload is bound.
    pub ip: String,
    pub labels: HashMap<String, String>,
    pub start_time: Option<DateTime<Utc>>,
    pub containers: Vec<ContainerInfo>,
}

impl PodInfo {
    /// `namespace/name` key used across caches and the probe API.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    pub fn is_running(&self) -> bool {
        self.status == "Running"
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ContainerInfo {
    pub name: String,
    pub image: String,
    pub state: ContainerState,
    pub ready: bool,
    /// Environment entries with non-empty literal values only.
    pub env: HashMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq, Display)]
pub enum ContainerState {
    Running,
    Waiting,
    Terminated,
    #[default]
    Unknown,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ServiceInfo {
    pub name: String,
    pub namespace: String,
    pub r#type: String,
    pub cluster_ip: String,
    pub ports: Vec<ServicePort>,
    pub selector: HashMap<String, String>,
}

impl ServiceInfo {
    /// A service targets a workload iff every selector key exists on the
    /// workload with an equal value. An empty selector targets nothing.
    pub fn targets(&self, pod: &PodInfo) -> bool {
        !self.selector.is_empty()
            && self
                .selector
                .iter()
                .all(|(k, v)| pod.labels.get(k) == Some(v))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ServicePort {
    pub name: String,
    pub port: i32,
    pub protocol: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct EventInfo {
    pub r#type: String,
    pub reason: String,
    pub message: String,
    pub source: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub count: i32,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct NetworkPolicyInfo {
    pub name: String,
    pub namespace: String,
    pub pod_selector: HashMap<String, String>,
    pub ingress: Vec<NetworkPolicyRule>,
    pub egress: Vec<NetworkPolicyRule>,
}

impl NetworkPolicyInfo {
    /// Label-equality match of the policy's pod selector against a workload.
    pub fn affects(&self, pod: &PodInfo) -> bool {
        self.pod_selector
            .iter()
            .any(|(k, v)| pod.labels.get(k) == Some(v))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct NetworkPolicyRule {
    pub ports: Vec<PortRule>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct PortRule {
    pub protocol: String,
    pub port: i32,
}

/// Descriptor of a custom resource definition discovered at runtime.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct CrdInfo {
    pub name: String,
    pub group: String,
    pub kind: String,
    /// `Cluster` or `Namespaced`.
    pub scope: String,
    pub versions: Vec<String>,
    pub plural: String,
    pub singular: String,
    pub established: bool,
    pub stored: bool,
    pub creation_time: Option<DateTime<Utc>>,
}

/// A custom resource instance with schema-flexible spec/status payloads.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct CustomResourceInfo {
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub group: String,
    pub version: String,
    pub spec: serde_json::Map<String, Value>,
    pub status: serde_json::Map<String, Value>,
    pub generation: i64,
    pub creation_time: Option<DateTime<Utc>>,
    pub update_time: Option<DateTime<Utc>>,
}

/// Neutral shape delivered to watch handlers for custom-kind events.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CrdEvent {
    /// `Added`, `Modified` or `Deleted`.
    pub r#type: String,
    pub kind: String,
    pub group: String,
    pub version: String,
    pub name: String,
    pub namespace: String,
    pub object: Value,
    pub timestamp: DateTime<Utc>,
}

/// Read a nested string out of an untyped spec/status map.
pub fn nested_str<'a>(map: &'a serde_json::Map<String, Value>, path: &[&str]) -> Option<&'a str> {
    nested_value(map, path).and_then(Value::as_str)
}

/// Read a nested number out of an untyped spec/status map. Integers are
/// widened to f64.
pub fn nested_f64(map: &serde_json::Map<String, Value>, path: &[&str]) -> Option<f64> {
    nested_value(map, path).and_then(Value::as_f64)
}

fn nested_value<'a>(map: &'a serde_json::Map<String, Value>, path: &[&str]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut current = map.get(*first)?;
    for field in rest {
        current = current.as_object()?.get(*field)?;
    }
    Some(current)
}
