use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::{nested_f64, nested_str};

/// Workload a scheduling request wants pinned to a UAV node.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct SchedulingWorkload {
    pub name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub r#type: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SchedulingRequestSpec {
    pub workload: SchedulingWorkload,
    #[serde(default)]
    pub min_battery_percent: f64,
    #[serde(default)]
    pub preferred_nodes: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl SchedulingRequestSpec {
    /// Lenient read from the untyped spec of a schedulingrequests custom
    /// resource. Absent or mistyped fields fall back to empty values.
    pub fn from_spec(spec: &serde_json::Map<String, Value>) -> Self {
        let mut out = SchedulingRequestSpec {
            workload: SchedulingWorkload {
                name: nested_str(spec, &["workload", "name"]).unwrap_or_default().to_string(),
                namespace: nested_str(spec, &["workload", "namespace"])
                    .unwrap_or_default()
                    .to_string(),
                r#type: nested_str(spec, &["workload", "type"]).unwrap_or_default().to_string(),
            },
            min_battery_percent: nested_f64(spec, &["minBatteryPercent"]).unwrap_or(0.0),
            ..Default::default()
        };
        if let Some(list) = spec.get("preferredNodes").and_then(Value::as_array) {
            out.preferred_nodes = list
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
        }
        out
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SchedulingRequestStatus {
    /// `Pending`, `Assigned` or `Failed`.
    pub phase: String,
    #[serde(default)]
    pub assigned_node: String,
    #[serde(default, rename = "assignedUAV")]
    pub assigned_uav: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl SchedulingRequestStatus {
    pub fn failed(message: impl Into<String>, now: DateTime<Utc>) -> Self {
        SchedulingRequestStatus {
            phase: "Failed".to_string(),
            message: message.into(),
            last_updated: Some(now),
            ..Default::default()
        }
    }

    pub fn assigned(candidate: &SchedulingCandidate, now: DateTime<Utc>) -> Self {
        SchedulingRequestStatus {
            phase: "Assigned".to_string(),
            assigned_node: candidate.node_name.clone(),
            assigned_uav: candidate.uav_id.clone(),
            score: candidate.score,
            message: format!(
                "selected node {} (battery {:.1}%)",
                candidate.node_name, candidate.battery
            ),
            last_updated: Some(now),
        }
    }
}

/// A `(node, uav)` pair under consideration by the reconciler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulingCandidate {
    pub node_name: String,
    pub uav_id: String,
    pub battery: f64,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn spec_parses_from_untyped_map() {
        let raw = json!({
            "workload": {"name": "job-1", "namespace": "default", "type": "inference"},
            "minBatteryPercent": 50,
            "preferredNodes": ["node-a", "node-b"],
        });
        let spec = SchedulingRequestSpec::from_spec(raw.as_object().unwrap());
        assert_eq!(spec.workload.name, "job-1");
        assert_eq!(spec.workload.namespace, "default");
        assert_eq!(spec.min_battery_percent, 50.0);
        assert_eq!(spec.preferred_nodes, vec!["node-a", "node-b"]);
    }

    #[test]
    fn spec_tolerates_missing_and_mistyped_fields() {
        let raw = json!({"minBatteryPercent": "not-a-number", "preferredNodes": [1, "node-a"]});
        let spec = SchedulingRequestSpec::from_spec(raw.as_object().unwrap());
        assert_eq!(spec.workload.name, "");
        assert_eq!(spec.min_battery_percent, 0.0);
        assert_eq!(spec.preferred_nodes, vec!["node-a"]);
    }

    #[test]
    fn status_serializes_with_camel_case_keys() {
        let status = SchedulingRequestStatus::assigned(
            &SchedulingCandidate {
                node_name: "node-a".into(),
                uav_id: "uav-node-a".into(),
                battery: 80.0,
                score: 90.0,
                last_heartbeat: None,
            },
            Utc::now(),
        );
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["phase"], "Assigned");
        assert_eq!(value["assignedNode"], "node-a");
        assert_eq!(value["assignedUAV"], "uav-node-a");
        assert_eq!(value["score"], 90.0);
        assert_eq!(value["message"], "selected node node-a (battery 80.0%)");
    }
}
