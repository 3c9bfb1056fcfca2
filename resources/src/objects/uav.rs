use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Full telemetry document produced by a UAV agent. Treated as an opaque
/// structured state by most of the system; the ingestion and scheduling
/// paths read specific fields out of it.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct UavState {
    pub uav_id: String,
    pub node_name: String,
    pub system_time: Option<DateTime<Utc>>,
    pub gps: GpsData,
    pub attitude: AttitudeData,
    pub flight: FlightData,
    pub battery: BatteryData,
    pub mission: MissionData,
    pub health: HealthData,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct GpsData {
    /// Degrees.
    pub latitude: f64,
    /// Degrees.
    pub longitude: f64,
    /// Meters above sea level.
    pub altitude: f64,
    /// Meters above the takeoff point.
    pub relative_altitude: f64,
    pub hdop: f64,
    pub satellite_count: i32,
    /// 0 = no fix, 2 = 2D, 3 = 3D.
    pub fix_type: i32,
    pub ground_speed: f64,
    pub course_over_ground: f64,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AttitudeData {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
    pub roll_rate: f64,
    pub pitch_rate: f64,
    pub yaw_rate: f64,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct FlightData {
    /// MANUAL, STABILIZE, LOITER, AUTO, RTL or LAND.
    pub mode: String,
    pub armed: bool,
    pub airspeed: f64,
    pub ground_speed: f64,
    pub vertical_speed: f64,
    pub throttle_percent: f64,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct BatteryData {
    pub voltage: f64,
    pub current: f64,
    pub remaining_percent: f64,
    /// mAh.
    pub remaining_capacity: f64,
    /// mAh.
    pub total_capacity: f64,
    pub temperature: f64,
    pub cell_count: i32,
    /// Estimated seconds of flight left.
    pub time_remaining: i32,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct MissionData {
    pub current_waypoint: i32,
    pub total_waypoints: i32,
    /// IDLE, ACTIVE, PAUSED or COMPLETED.
    pub mission_state: String,
    pub distance_to_wp: f64,
    pub eta_to_wp: i32,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct HealthData {
    /// OK, WARNING, CRITICAL or ERROR.
    pub system_status: String,
    pub sensors_health: HashMap<String, bool>,
    pub error_count: i32,
    pub warning_count: i32,
    pub messages: Vec<String>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Telemetry report pushed by an agent to the ingestion endpoint.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct UavReport {
    pub node_name: String,
    #[serde(default)]
    pub node_ip: String,
    #[serde(default)]
    pub uav_id: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub heartbeat_interval_seconds: u64,
    #[serde(default)]
    pub state: Option<UavState>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl UavReport {
    /// Fill the defaults the ingestion contract promises: uav id derived
    /// from the node name, current UTC timestamp, `agent` source and
    /// `active` status.
    pub fn apply_defaults(&mut self, now: DateTime<Utc>) {
        if self.uav_id.is_empty() {
            self.uav_id = format!("uav-{}", self.node_name);
        }
        if self.timestamp.is_none() {
            self.timestamp = Some(now);
        }
        if self.source.is_empty() {
            self.source = "agent".to_string();
        }
        if self.status.is_empty() {
            self.status = "active".to_string();
        }
    }
}

/// Per-node entry in the aggregator's UAV cache.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct UavSnapshotEntry {
    pub node_name: String,
    pub uav_id: String,
    pub status: String,
    /// `pull` when collected from the agent, `agent` when pushed by it.
    pub source: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<UavState>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_defaults_fill_missing_fields() {
        let now = Utc::now();
        let mut report = UavReport {
            node_name: "node-a".into(),
            ..Default::default()
        };
        report.apply_defaults(now);
        assert_eq!(report.uav_id, "uav-node-a");
        assert_eq!(report.timestamp, Some(now));
        assert_eq!(report.source, "agent");
        assert_eq!(report.status, "active");
    }

    #[test]
    fn report_defaults_keep_existing_fields() {
        let now = Utc::now();
        let earlier = now - chrono::Duration::seconds(30);
        let mut report = UavReport {
            node_name: "node-a".into(),
            uav_id: "UAV-7".into(),
            source: "pull".into(),
            status: "standby".into(),
            timestamp: Some(earlier),
            ..Default::default()
        };
        report.apply_defaults(now);
        assert_eq!(report.uav_id, "UAV-7");
        assert_eq!(report.source, "pull");
        assert_eq!(report.status, "standby");
        assert_eq!(report.timestamp, Some(earlier));
    }

    #[test]
    fn report_parses_with_minimal_body() {
        let report: UavReport = serde_json::from_str(
            r#"{"node_name":"node-a","state":{"battery":{"remaining_percent":55.0}}}"#,
        )
        .unwrap();
        assert_eq!(report.node_name, "node-a");
        let state = report.state.unwrap();
        assert_eq!(state.battery.remaining_percent, 55.0);
        assert_eq!(state.flight.mode, "");
    }
}
