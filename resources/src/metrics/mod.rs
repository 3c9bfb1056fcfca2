use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::objects::uav::UavSnapshotEntry;

/// Hardware and health metrics for one node.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct NodeMetrics {
    pub node_name: String,
    pub timestamp: Option<DateTime<Utc>>,

    /// Millicores; 1000 = one core.
    pub cpu_capacity: i64,
    pub cpu_usage: i64,
    /// 0-100.
    pub cpu_usage_rate: f64,

    /// Bytes.
    pub memory_capacity: i64,
    pub memory_usage: i64,
    pub memory_usage_rate: f64,

    /// Bytes, from ephemeral storage.
    pub disk_capacity: i64,
    pub disk_usage: i64,
    pub disk_usage_rate: f64,

    /// Milliseconds; populated by network tests when available.
    pub network_latency: f64,
    /// Mbps; placeholder until a bandwidth test exists.
    pub network_bandwidth: f64,

    pub gpu_count: i32,
    pub gpu_models: Vec<String>,
    /// Per-GPU usage, 0-100, parallel to `gpu_models`.
    pub gpu_usage: Vec<f64>,
    /// MB.
    pub gpu_memory_total: Vec<i64>,
    pub gpu_memory_used: Vec<i64>,

    pub healthy: bool,
    /// Failing conditions such as `MemoryPressure: ...`.
    pub conditions: Vec<String>,

    pub labels: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub custom_metrics: serde_json::Map<String, Value>,
}

/// Constraints a node must satisfy to host a workload.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct NodeConstraints {
    pub min_cpu_cores: f64,
    pub min_memory_gb: f64,
    pub require_gpu: bool,
    pub min_gpus: i32,
    pub min_disk_gb: f64,
    pub max_latency_ms: f64,
    pub node_labels: HashMap<String, String>,
}

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

impl NodeMetrics {
    /// Free resources as `(cpu cores, memory GB, disk GB)`.
    pub fn available_resources(&self) -> (f64, f64, f64) {
        (
            (self.cpu_capacity - self.cpu_usage) as f64 / 1000.0,
            (self.memory_capacity - self.memory_usage) as f64 / GIB,
            (self.disk_capacity - self.disk_usage) as f64 / GIB,
        )
    }

    pub fn is_under_pressure(&self) -> bool {
        self.cpu_usage_rate > 80.0 || self.memory_usage_rate > 80.0 || self.disk_usage_rate > 90.0
    }

    pub fn meets_constraints(&self, c: &NodeConstraints) -> bool {
        if !self.healthy {
            return false;
        }
        let (cpu_cores, memory_gb, disk_gb) = self.available_resources();
        if cpu_cores < c.min_cpu_cores || memory_gb < c.min_memory_gb {
            return false;
        }
        if c.require_gpu && self.gpu_count < c.min_gpus.max(1) {
            return false;
        }
        if c.min_disk_gb > 0.0 && disk_gb < c.min_disk_gb {
            return false;
        }
        if c.max_latency_ms > 0.0 && self.network_latency > c.max_latency_ms {
            return false;
        }
        c.node_labels
            .iter()
            .all(|(k, v)| self.labels.get(k) == Some(v))
    }
}

/// Resource usage for one workload, with per-container breakdown.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct PodMetrics {
    pub pod_name: String,
    pub namespace: String,
    pub node_name: String,
    pub timestamp: Option<DateTime<Utc>>,

    /// Millicores.
    pub cpu_usage: i64,
    /// Bytes.
    pub memory_usage: i64,

    pub cpu_request: i64,
    pub cpu_limit: i64,
    pub memory_request: i64,
    pub memory_limit: i64,

    /// Usage relative to the limit, 0-100.
    pub cpu_usage_rate: f64,
    pub memory_usage_rate: f64,

    pub containers: Vec<ContainerMetrics>,

    pub phase: String,
    pub ready: bool,
    pub restarts: i32,
    pub start_time: Option<DateTime<Utc>>,
}

impl PodMetrics {
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.pod_name)
    }

    /// Usage relative to requests as `(cpu%, memory%)`; zero when no
    /// request is set.
    pub fn resource_utilization(&self) -> (f64, f64) {
        let cpu = if self.cpu_request > 0 {
            self.cpu_usage as f64 / self.cpu_request as f64 * 100.0
        } else {
            0.0
        };
        let memory = if self.memory_request > 0 {
            self.memory_usage as f64 / self.memory_request as f64 * 100.0
        } else {
            0.0
        };
        (cpu, memory)
    }

    /// True when any measured usage sits at 90% of its limit or above.
    pub fn is_over_limit(&self) -> bool {
        (self.cpu_limit > 0 && self.cpu_usage as f64 >= self.cpu_limit as f64 * 0.9)
            || (self.memory_limit > 0 && self.memory_usage as f64 >= self.memory_limit as f64 * 0.9)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ContainerMetrics {
    pub name: String,
    pub cpu_usage: i64,
    pub memory_usage: i64,
    pub cpu_request: i64,
    pub cpu_limit: i64,
    pub memory_request: i64,
    pub memory_limit: i64,
}

/// Result of one pod-to-pod connectivity test.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct NetworkMetrics {
    pub source_pod: String,
    pub target_pod: String,
    pub timestamp: Option<DateTime<Utc>>,

    pub connected: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,

    #[serde(rename = "rtt_ms")]
    pub rtt: f64,
    /// 0-100.
    pub packet_loss: f64,

    #[serde(rename = "bandwidth_mbps", skip_serializing_if = "Option::is_none")]
    pub bandwidth: Option<f64>,

    /// `ping`, `http` or `mixed`.
    pub test_method: String,
}

impl NetworkMetrics {
    /// Quality grade derived strictly from RTT when connected.
    pub fn quality(&self) -> &'static str {
        if !self.connected {
            return "disconnected";
        }
        match self.rtt {
            rtt if rtt < 10.0 => "excellent",
            rtt if rtt < 50.0 => "good",
            rtt if rtt < 100.0 => "fair",
            _ => "poor",
        }
    }
}

/// Cluster-wide rollup derived from one snapshot.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ClusterMetrics {
    pub timestamp: Option<DateTime<Utc>>,

    pub total_nodes: usize,
    pub healthy_nodes: usize,
    pub total_pods: usize,
    pub running_pods: usize,

    pub total_cpu: i64,
    pub used_cpu: i64,
    pub cpu_usage_rate: f64,

    pub total_memory: i64,
    pub used_memory: i64,
    pub memory_usage_rate: f64,

    pub total_gpus: i32,
    /// GPUs with a usage reading under 50%.
    pub available_gpus: i32,

    /// `healthy`, `warning` or `critical`.
    pub health_status: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
}

/// Immutable composite result of one collection cycle. Built fresh each
/// cycle and published by pointer swap; never mutated afterwards.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub timestamp: Option<DateTime<Utc>>,
    pub node_metrics: HashMap<String, NodeMetrics>,
    /// Keyed by `namespace/name`.
    pub pod_metrics: HashMap<String, PodMetrics>,
    pub network_metrics: Vec<NetworkMetrics>,
    pub cluster_metrics: ClusterMetrics,
}

/// The aggregator's UAV cache, keyed by node name.
pub type UavMetricsMap = HashMap<String, UavSnapshotEntry>;
