//! Scheduling reconciler: every tick, scan pending scheduling requests and
//! the persisted UAV telemetry, score candidates under the request's
//! constraints and write the assignment back. Requests already `Assigned`
//! or `Failed` are left alone.

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use kube::api::DynamicObject;
use tracing::{error, info};

use cluster::client::{scheduling_request_resource, uav_metric_resource};
use cluster::convert::dynamic_to_custom_resource;
use cluster::ClusterClient;
use resources::objects::scheduling::{
    SchedulingCandidate, SchedulingRequestSpec, SchedulingRequestStatus,
};
use resources::objects::{nested_f64, nested_str, CustomResourceInfo};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

pub struct Controller {
    client: ClusterClient,
    interval: Duration,
}

impl Controller {
    pub fn new(client: ClusterClient, interval: Duration) -> Self {
        Controller {
            client,
            interval: if interval.is_zero() {
                DEFAULT_INTERVAL
            } else {
                interval
            },
        }
    }

    /// Tick until the shutdown signal fires. Two passes never overlap: the
    /// next tick waits for the in-flight one.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) -> Result<()> {
        info!("starting scheduler controller (interval: {:?})", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if let Err(err) = self.reconcile().await {
                error!("reconcile failed: {err}");
            }

            tokio::select! {
                _ = shutdown.changed() => {
                    info!("scheduler controller stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }
        }
    }

    async fn reconcile(&self) -> Result<()> {
        let request_ar = scheduling_request_resource();
        let requests = self
            .client
            .list_custom_resources(&request_ar, None)
            .await?;

        let uav_ar = uav_metric_resource();
        let uavs: Vec<CustomResourceInfo> = self
            .client
            .list_custom_resources(&uav_ar, None)
            .await?
            .iter()
            .map(|obj| dynamic_to_custom_resource(obj, "monitoring.io", "UAVMetric"))
            .collect();

        for request in &requests {
            if let Err(err) = self.process_request(request, &uavs).await {
                error!(
                    "process request {}/{} failed: {err}",
                    request.metadata.namespace.as_deref().unwrap_or_default(),
                    request.metadata.name.as_deref().unwrap_or_default(),
                );
            }
        }

        Ok(())
    }

    async fn process_request(
        &self,
        request: &DynamicObject,
        uavs: &[CustomResourceInfo],
    ) -> Result<()> {
        let record = dynamic_to_custom_resource(request, "scheduler.io", "SchedulingRequest");
        let phase = nested_str(&record.status, &["phase"]).unwrap_or_default();
        if !phase.is_empty() && phase != "Pending" {
            return Ok(());
        }

        let spec = SchedulingRequestSpec::from_spec(&record.spec);
        let now = Utc::now();

        if spec.workload.name.is_empty() || spec.workload.namespace.is_empty() {
            return self
                .write_status(
                    &record,
                    SchedulingRequestStatus::failed("workload name/namespace cannot be empty", now),
                )
                .await;
        }

        let mut candidates = build_candidates(&spec, uavs);
        if candidates.is_empty() {
            return self
                .write_status(
                    &record,
                    SchedulingRequestStatus::failed("no UAV node meets constraints", now),
                )
                .await;
        }

        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        let chosen = &candidates[0];

        info!(
            "assigning request {}/{} to node {} (score {:.1})",
            record.namespace, record.name, chosen.node_name, chosen.score
        );
        self.write_status(&record, SchedulingRequestStatus::assigned(chosen, now))
            .await
    }

    async fn write_status(
        &self,
        record: &CustomResourceInfo,
        status: SchedulingRequestStatus,
    ) -> Result<()> {
        let ar = scheduling_request_resource();
        self.client
            .patch_custom_resource_status(
                &ar,
                &record.namespace,
                &record.name,
                serde_json::to_value(&status)?,
            )
            .await?;
        Ok(())
    }
}

/// Score each usable UAV: battery percent plus a 10-point bonus for
/// preferred nodes (case-insensitive). UAVs with an empty node name, a
/// non-`active` collection status, or battery below the request's floor
/// are discarded.
pub fn build_candidates(
    spec: &SchedulingRequestSpec,
    uavs: &[CustomResourceInfo],
) -> Vec<SchedulingCandidate> {
    let preferred: Vec<String> = spec
        .preferred_nodes
        .iter()
        .map(|node| node.to_lowercase())
        .collect();

    let mut candidates = Vec::new();
    for uav in uavs {
        let node_name = nested_str(&uav.spec, &["node_name"]).unwrap_or_default();
        if node_name.is_empty() {
            continue;
        }

        let battery = nested_f64(&uav.spec, &["battery", "remaining_percent"]).unwrap_or(0.0);
        if spec.min_battery_percent > 0.0 && battery < spec.min_battery_percent {
            continue;
        }

        let collection_status = nested_str(&uav.status, &["collection_status"])
            .unwrap_or_default()
            .to_lowercase();
        if !collection_status.is_empty() && collection_status != "active" {
            continue;
        }

        let mut score = battery;
        if preferred.contains(&node_name.to_lowercase()) {
            score += 10.0;
        }

        let last_heartbeat = nested_str(&uav.status, &["last_update"])
            .and_then(|raw| chrono::DateTime::parse_from_rfc3339(raw).ok())
            .map(|ts| ts.with_timezone(&Utc));

        candidates.push(SchedulingCandidate {
            node_name: node_name.to_string(),
            uav_id: nested_str(&uav.spec, &["uav_id"]).unwrap_or_default().to_string(),
            battery,
            last_heartbeat,
            score,
        });
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn uav(node: &str, battery: f64, collection_status: &str) -> CustomResourceInfo {
        CustomResourceInfo {
            kind: "UAVMetric".into(),
            name: format!("uavmetric-{node}"),
            namespace: "default".into(),
            group: "monitoring.io".into(),
            spec: json!({
                "node_name": node,
                "uav_id": format!("uav-{node}"),
                "battery": {"remaining_percent": battery},
            })
            .as_object()
            .unwrap()
            .clone(),
            status: json!({
                "collection_status": collection_status,
                "last_update": "2025-06-01T10:00:00Z",
            })
            .as_object()
            .unwrap()
            .clone(),
            ..Default::default()
        }
    }

    fn spec(min_battery: f64, preferred: &[&str]) -> SchedulingRequestSpec {
        SchedulingRequestSpec {
            min_battery_percent: min_battery,
            preferred_nodes: preferred.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn battery_floor_filters_candidates() {
        let uavs = vec![uav("node-a", 80.0, "active"), uav("node-b", 40.0, "active")];
        let candidates = build_candidates(&spec(50.0, &["node-b"]), &uavs);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].node_name, "node-a");
        assert_eq!(candidates[0].score, 80.0);
    }

    #[test]
    fn preferred_node_bonus_is_case_insensitive() {
        let uavs = vec![uav("node-a", 80.0, "active")];
        let candidates = build_candidates(&spec(50.0, &["NODE-A"]), &uavs);
        assert_eq!(candidates[0].score, 90.0);
    }

    #[test]
    fn inactive_collection_status_is_discarded() {
        let uavs = vec![
            uav("node-a", 80.0, "paused"),
            uav("node-b", 70.0, "active"),
            // An empty status means the field was never written; usable.
            uav("node-c", 60.0, ""),
        ];
        let candidates = build_candidates(&spec(0.0, &[]), &uavs);
        let nodes: Vec<&str> = candidates.iter().map(|c| c.node_name.as_str()).collect();
        assert_eq!(nodes, vec!["node-b", "node-c"]);
    }

    #[test]
    fn no_uavs_yield_no_candidates() {
        assert!(build_candidates(&spec(0.0, &[]), &[]).is_empty());
    }

    #[test]
    fn empty_node_name_is_discarded() {
        let mut broken = uav("node-a", 80.0, "active");
        broken.spec.insert("node_name".into(), json!(""));
        assert!(build_candidates(&spec(0.0, &[]), &[broken]).is_empty());
    }

    #[test]
    fn zero_min_battery_accepts_empty_batteries() {
        let mut no_battery = uav("node-a", 0.0, "active");
        no_battery.spec.remove("battery");
        let candidates = build_candidates(&spec(0.0, &[]), &[no_battery]);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].battery, 0.0);
    }

    #[test]
    fn heartbeat_parses_from_status() {
        let uavs = vec![uav("node-a", 80.0, "active")];
        let candidates = build_candidates(&spec(0.0, &[]), &uavs);
        assert!(candidates[0].last_heartbeat.is_some());
    }

    #[test]
    fn highest_score_wins_with_stable_order() {
        let uavs = vec![
            uav("node-a", 80.0, "active"),
            uav("node-b", 40.0, "active"),
            uav("node-c", 80.0, "active"),
        ];
        let mut candidates = build_candidates(&spec(0.0, &["node-b"]), &uavs);
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        // node-a and node-c tie at 80; stable sort keeps listing order.
        assert_eq!(candidates[0].node_name, "node-a");
        assert_eq!(candidates[1].node_name, "node-c");
        // node-b got the bonus but still trails.
        assert_eq!(candidates[2].score, 50.0);
    }
}
