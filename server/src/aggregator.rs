//! Tick-driven metrics aggregator: fans out to the enabled sources, joins
//! their results into a fresh immutable snapshot, derives the cluster
//! rollup and publishes by pointer swap. Also the sink for agent-pushed
//! UAV reports.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use resources::metrics::{
    ClusterMetrics, MetricsSnapshot, NetworkMetrics, NodeMetrics, PodMetrics, UavMetricsMap,
};
use resources::objects::uav::{UavReport, UavSnapshotEntry};

use crate::sources::{
    BoxedSource, NetworkMetricsList, NodeMetricsMap, PodMetricsMap, UavStateMap,
};

#[derive(Default)]
struct Cache {
    snapshot: Arc<MetricsSnapshot>,
    uav: UavMetricsMap,
    heartbeats: HashMap<String, DateTime<Utc>>,
}

pub struct MetricsAggregator {
    node_source: Option<BoxedSource<NodeMetricsMap>>,
    pod_source: Option<BoxedSource<PodMetricsMap>>,
    network_source: Option<BoxedSource<NetworkMetricsList>>,
    uav_source: Option<BoxedSource<UavStateMap>>,

    interval: Duration,
    keep_last_on_error: bool,

    cache: RwLock<Cache>,
    running: Mutex<bool>,
    stop: Notify,
}

impl MetricsAggregator {
    pub fn new(interval: Duration, keep_last_on_error: bool) -> Self {
        MetricsAggregator {
            node_source: None,
            pod_source: None,
            network_source: None,
            uav_source: None,
            interval,
            keep_last_on_error,
            cache: RwLock::new(Cache::default()),
            running: Mutex::new(false),
            stop: Notify::new(),
        }
    }

    pub fn with_node_source(mut self, source: BoxedSource<NodeMetricsMap>) -> Self {
        self.node_source = Some(source);
        self
    }

    pub fn with_pod_source(mut self, source: BoxedSource<PodMetricsMap>) -> Self {
        self.pod_source = Some(source);
        self
    }

    pub fn with_network_source(mut self, source: BoxedSource<NetworkMetricsList>) -> Self {
        self.network_source = Some(source);
        self
    }

    pub fn with_uav_source(mut self, source: BoxedSource<UavStateMap>) -> Self {
        self.uav_source = Some(source);
        self
    }

    pub fn is_running(&self) -> bool {
        *self.running.lock()
    }

    /// Run one synchronous collection, then tick at the configured period
    /// until [`stop`](Self::stop) is called. Refuses a second concurrent
    /// start and a zero period.
    pub async fn start(&self) -> Result<()> {
        {
            let mut running = self.running.lock();
            if *running {
                bail!("metrics aggregator is already running");
            }
            if self.interval.is_zero() {
                bail!("collection interval must be greater than zero");
            }
            *running = true;
        }

        info!("starting metrics aggregator with interval {:?}", self.interval);
        self.collect().await;

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.stop.notified() => break,
                _ = ticker.tick() => self.collect().await,
            }
        }

        *self.running.lock() = false;
        info!("metrics aggregator stopped");
        Ok(())
    }

    /// Signal the loop to exit after the in-flight cycle.
    pub fn stop(&self) -> Result<()> {
        if !self.is_running() {
            bail!("metrics aggregator is not running");
        }
        self.stop.notify_one();
        Ok(())
    }

    /// One collection cycle. Source failures are logged and contribute an
    /// empty section (or the previous one under keep-last policy); the
    /// cycle itself never fails.
    pub async fn collect(&self) {
        let started = Utc::now();

        let node_fut = async {
            match &self.node_source {
                Some(source) => Some(source.collect().await),
                None => None,
            }
        };
        let pod_fut = async {
            match &self.pod_source {
                Some(source) => Some(source.collect().await),
                None => None,
            }
        };
        let network_fut = async {
            match &self.network_source {
                Some(source) => Some(source.collect().await),
                None => None,
            }
        };
        let uav_fut = async {
            match &self.uav_source {
                Some(source) => Some(source.collect().await),
                None => None,
            }
        };

        let (node_result, pod_result, network_result, uav_result) =
            tokio::join!(node_fut, pod_fut, network_fut, uav_fut);

        let mut snapshot = MetricsSnapshot {
            timestamp: Some(started),
            ..Default::default()
        };

        snapshot.node_metrics = match node_result {
            Some(Ok(map)) => map,
            Some(Err(err)) => {
                error!("failed to collect node metrics: {err}");
                self.carried_section(|cache| cache.snapshot.node_metrics.clone())
            }
            None => HashMap::new(),
        };
        snapshot.pod_metrics = match pod_result {
            Some(Ok(map)) => map,
            Some(Err(err)) => {
                error!("failed to collect pod metrics: {err}");
                self.carried_section(|cache| cache.snapshot.pod_metrics.clone())
            }
            None => HashMap::new(),
        };
        snapshot.network_metrics = match network_result {
            Some(Ok(list)) => list,
            Some(Err(err)) => {
                warn!("network metrics collection had errors: {err}");
                self.carried_section(|cache| cache.snapshot.network_metrics.clone())
            }
            None => Vec::new(),
        };

        let uav_states = match uav_result {
            Some(Ok(map)) => Some(map),
            Some(Err(err)) => {
                error!("failed to collect UAV metrics: {err}");
                None
            }
            None => None,
        };

        snapshot.cluster_metrics = calculate_cluster_metrics(
            started,
            &snapshot.node_metrics,
            &snapshot.pod_metrics,
        );

        let node_count = snapshot.node_metrics.len();
        let pod_count = snapshot.pod_metrics.len();
        let network_count = snapshot.network_metrics.len();
        let uav_count = uav_states.as_ref().map(HashMap::len).unwrap_or(0);

        {
            let mut cache = self.cache.write();
            cache.snapshot = Arc::new(snapshot);
            if let Some(states) = uav_states {
                let now = Utc::now();
                for (node_name, state) in states {
                    cache.heartbeats.insert(node_name.clone(), now);
                    cache.uav.insert(
                        node_name.clone(),
                        UavSnapshotEntry {
                            node_name,
                            uav_id: state.uav_id.clone(),
                            status: "active".to_string(),
                            source: "pull".to_string(),
                            timestamp: Some(now),
                            last_heartbeat: Some(now),
                            state: Some(state),
                            ..Default::default()
                        },
                    );
                }
            }
        }

        info!(
            "metrics collection completed in {}ms (nodes: {node_count}, pods: {pod_count}, network: {network_count}, uavs: {uav_count})",
            (Utc::now() - started).num_milliseconds()
        );
    }

    fn carried_section<T: Default>(&self, read: impl Fn(&Cache) -> T) -> T {
        if self.keep_last_on_error {
            read(&self.cache.read())
        } else {
            T::default()
        }
    }

    pub fn get_latest_snapshot(&self) -> Arc<MetricsSnapshot> {
        self.cache.read().snapshot.clone()
    }

    pub fn get_node_metrics(&self, node_name: &str) -> Option<NodeMetrics> {
        self.cache.read().snapshot.node_metrics.get(node_name).cloned()
    }

    pub fn get_pod_metrics(&self, namespace: &str, name: &str) -> Option<PodMetrics> {
        self.cache
            .read()
            .snapshot
            .pod_metrics
            .get(&format!("{namespace}/{name}"))
            .cloned()
    }

    pub fn get_cluster_metrics(&self) -> ClusterMetrics {
        self.cache.read().snapshot.cluster_metrics.clone()
    }

    pub fn get_network_metrics(&self) -> Vec<NetworkMetrics> {
        self.cache.read().snapshot.network_metrics.clone()
    }

    pub fn get_uav_metrics(&self) -> UavMetricsMap {
        self.cache.read().uav.clone()
    }

    pub fn get_single_uav_metrics(&self, node_name: &str) -> Option<UavSnapshotEntry> {
        self.cache.read().uav.get(node_name).cloned()
    }

    pub fn last_heartbeat(&self, node_name: &str) -> Option<DateTime<Utc>> {
        self.cache.read().heartbeats.get(node_name).copied()
    }

    /// Ingest an agent-pushed report: defaults applied, stored under the
    /// report's node with source `agent`, heartbeat recorded in the same
    /// critical section. Empty node names are ignored.
    pub fn update_uav_report(&self, report: &UavReport) {
        if report.node_name.is_empty() {
            return;
        }

        let mut report = report.clone();
        report.apply_defaults(Utc::now());
        let report_time = report.timestamp.unwrap_or_else(Utc::now);

        let entry = UavSnapshotEntry {
            node_name: report.node_name.clone(),
            uav_id: report.uav_id.clone(),
            status: report.status.clone(),
            source: report.source.clone(),
            timestamp: Some(report_time),
            last_heartbeat: Some(report_time),
            node_ip: (!report.node_ip.is_empty()).then(|| report.node_ip.clone()),
            heartbeat_interval_seconds: (report.heartbeat_interval_seconds > 0)
                .then_some(report.heartbeat_interval_seconds),
            metadata: (!report.metadata.is_empty()).then(|| report.metadata.clone()),
            state: report.state.clone(),
        };

        let mut cache = self.cache.write();
        cache.uav.insert(report.node_name.clone(), entry);
        cache.heartbeats.insert(report.node_name.clone(), report_time);
        debug!(
            "UAV report ingested: node={} uav={} status={}",
            report.node_name, report.uav_id, report.status
        );
    }
}

/// Derive the cluster rollup: counts, resource totals, GPU availability
/// and the categorical health state.
pub fn calculate_cluster_metrics(
    timestamp: DateTime<Utc>,
    nodes: &HashMap<String, NodeMetrics>,
    pods: &HashMap<String, PodMetrics>,
) -> ClusterMetrics {
    let mut cluster = ClusterMetrics {
        timestamp: Some(timestamp),
        total_nodes: nodes.len(),
        total_pods: pods.len(),
        ..Default::default()
    };

    for node in nodes.values() {
        if node.healthy {
            cluster.healthy_nodes += 1;
        }
        cluster.total_cpu += node.cpu_capacity;
        cluster.used_cpu += node.cpu_usage;
        cluster.total_memory += node.memory_capacity;
        cluster.used_memory += node.memory_usage;
        cluster.total_gpus += node.gpu_count;
        cluster.available_gpus += node.gpu_usage.iter().filter(|&&u| u < 50.0).count() as i32;
    }

    cluster.running_pods = pods.values().filter(|p| p.phase == "Running").count();

    if cluster.total_cpu > 0 {
        cluster.cpu_usage_rate = cluster.used_cpu as f64 / cluster.total_cpu as f64 * 100.0;
    }
    if cluster.total_memory > 0 {
        cluster.memory_usage_rate =
            cluster.used_memory as f64 / cluster.total_memory as f64 * 100.0;
    }

    if cluster.healthy_nodes < cluster.total_nodes {
        cluster.issues.push(format!(
            "{} nodes are unhealthy",
            cluster.total_nodes - cluster.healthy_nodes
        ));
    }
    if cluster.cpu_usage_rate > 80.0 {
        cluster
            .issues
            .push(format!("High CPU usage: {:.1}%", cluster.cpu_usage_rate));
    }
    if cluster.memory_usage_rate > 80.0 {
        cluster
            .issues
            .push(format!("High memory usage: {:.1}%", cluster.memory_usage_rate));
    }

    cluster.health_status = if cluster.issues.is_empty() {
        "healthy".to_string()
    } else if cluster.cpu_usage_rate > 90.0
        || cluster.memory_usage_rate > 90.0
        || cluster.healthy_nodes < cluster.total_nodes / 2
    {
        "critical".to_string()
    } else {
        "warning".to_string()
    };

    cluster
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::sources::MetricsSource;
    use resources::objects::uav::UavState;

    struct FakeSource<T: Clone> {
        output: T,
        fail: AtomicBool,
    }

    impl<T: Clone> FakeSource<T> {
        fn new(output: T) -> Box<Self> {
            Box::new(FakeSource {
                output,
                fail: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl<T: Clone + Send + Sync> MetricsSource for FakeSource<T> {
        type Output = T;

        async fn collect(&self) -> cluster::Result<T> {
            if self.fail.load(Ordering::SeqCst) {
                Err(cluster::Error::Unreachable("fake source down".into()))
            } else {
                Ok(self.output.clone())
            }
        }
    }

    fn node(name: &str, healthy: bool, cpu_rate_pct: i64) -> NodeMetrics {
        NodeMetrics {
            node_name: name.into(),
            healthy,
            cpu_capacity: 1000,
            cpu_usage: cpu_rate_pct * 10,
            memory_capacity: 1000,
            memory_usage: 100,
            ..Default::default()
        }
    }

    fn node_map(nodes: Vec<NodeMetrics>) -> NodeMetricsMap {
        nodes.into_iter().map(|n| (n.node_name.clone(), n)).collect()
    }

    #[tokio::test]
    async fn collect_publishes_a_fresh_snapshot() {
        let aggregator = MetricsAggregator::new(Duration::from_secs(30), false)
            .with_node_source(FakeSource::new(node_map(vec![node("node-a", true, 10)])));

        let before = aggregator.get_latest_snapshot();
        aggregator.collect().await;
        let after = aggregator.get_latest_snapshot();

        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.node_metrics.len(), 1);
        assert!(aggregator.get_node_metrics("node-a").is_some());
        assert!(aggregator.get_node_metrics("node-b").is_none());
        assert_eq!(after.cluster_metrics.health_status, "healthy");
    }

    /// A source whose failure can be toggled from the test body.
    fn toggle_source() -> (BoxedSource<NodeMetricsMap>, Arc<AtomicBool>) {
        let flag = Arc::new(AtomicBool::new(false));
        (Box::new(ToggleSource { fail: flag.clone() }), flag)
    }

    struct ToggleSource {
        fail: Arc<AtomicBool>,
    }

    #[async_trait]
    impl MetricsSource for ToggleSource {
        type Output = NodeMetricsMap;

        async fn collect(&self) -> cluster::Result<NodeMetricsMap> {
            if self.fail.load(Ordering::SeqCst) {
                Err(cluster::Error::Unreachable("down".into()))
            } else {
                Ok(node_map(vec![node("node-a", true, 10)]))
            }
        }
    }

    #[tokio::test]
    async fn failed_source_contributes_empty_by_default() {
        let (source, fail) = toggle_source();
        let aggregator =
            MetricsAggregator::new(Duration::from_secs(30), false).with_node_source(source);

        aggregator.collect().await;
        assert_eq!(aggregator.get_latest_snapshot().node_metrics.len(), 1);

        // Flip the source into failure; stale data must not persist.
        fail.store(true, Ordering::SeqCst);
        aggregator.collect().await;
        assert!(aggregator.get_latest_snapshot().node_metrics.is_empty());
    }

    #[tokio::test]
    async fn keep_last_policy_carries_sections_but_timestamp_advances() {
        let (source, fail) = toggle_source();
        let aggregator =
            MetricsAggregator::new(Duration::from_secs(30), true).with_node_source(source);

        aggregator.collect().await;
        let first = aggregator.get_latest_snapshot();
        assert_eq!(first.node_metrics.len(), 1);

        fail.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        aggregator.collect().await;
        let second = aggregator.get_latest_snapshot();

        assert_eq!(second.node_metrics.len(), 1, "keep-last carries the section");
        assert!(second.timestamp > first.timestamp, "timestamp still advances");
    }

    #[tokio::test]
    async fn uav_pull_wraps_states_into_entries() {
        let mut states = UavStateMap::new();
        states.insert(
            "node-a".to_string(),
            UavState {
                uav_id: "uav-1".into(),
                ..Default::default()
            },
        );
        let aggregator = MetricsAggregator::new(Duration::from_secs(30), false)
            .with_uav_source(FakeSource::new(states));

        aggregator.collect().await;

        let entry = aggregator.get_single_uav_metrics("node-a").unwrap();
        assert_eq!(entry.source, "pull");
        assert_eq!(entry.status, "active");
        assert_eq!(entry.uav_id, "uav-1");
        assert!(entry.last_heartbeat.is_some());
        assert_eq!(aggregator.last_heartbeat("node-a"), entry.last_heartbeat);
    }

    #[tokio::test]
    async fn pull_merge_replaces_per_node_and_keeps_others() {
        let mut states = UavStateMap::new();
        states.insert("node-a".to_string(), UavState::default());
        let aggregator = MetricsAggregator::new(Duration::from_secs(30), false)
            .with_uav_source(FakeSource::new(states));

        // An agent-pushed entry for another node survives the pull merge.
        aggregator.update_uav_report(&UavReport {
            node_name: "node-b".into(),
            ..Default::default()
        });
        aggregator.collect().await;

        assert_eq!(aggregator.get_uav_metrics().len(), 2);
        assert_eq!(
            aggregator.get_single_uav_metrics("node-b").unwrap().source,
            "agent"
        );
        assert_eq!(
            aggregator.get_single_uav_metrics("node-a").unwrap().source,
            "pull"
        );
    }

    #[test]
    fn ingested_report_defaults_and_stores() {
        let aggregator = MetricsAggregator::new(Duration::from_secs(30), false);
        aggregator.update_uav_report(&UavReport {
            node_name: "node-a".into(),
            heartbeat_interval_seconds: 15,
            ..Default::default()
        });

        let entry = aggregator.get_single_uav_metrics("node-a").unwrap();
        assert_eq!(entry.uav_id, "uav-node-a");
        assert_eq!(entry.source, "agent");
        assert_eq!(entry.status, "active");
        assert_eq!(entry.heartbeat_interval_seconds, Some(15));
        assert!(entry.node_ip.is_none());
    }

    #[test]
    fn ingesting_twice_is_idempotent_modulo_timestamps() {
        let aggregator = MetricsAggregator::new(Duration::from_secs(30), false);
        let report = UavReport {
            node_name: "node-a".into(),
            uav_id: "uav-7".into(),
            timestamp: Some(Utc::now()),
            ..Default::default()
        };
        aggregator.update_uav_report(&report);
        let first = aggregator.get_single_uav_metrics("node-a").unwrap();
        aggregator.update_uav_report(&report);
        let second = aggregator.get_single_uav_metrics("node-a").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn empty_node_name_is_a_no_op() {
        let aggregator = MetricsAggregator::new(Duration::from_secs(30), false);
        aggregator.update_uav_report(&UavReport::default());
        assert!(aggregator.get_uav_metrics().is_empty());
    }

    #[tokio::test]
    async fn zero_interval_refuses_to_start() {
        let aggregator = MetricsAggregator::new(Duration::ZERO, false);
        let err = aggregator.start().await.unwrap_err();
        assert!(err.to_string().contains("interval"));
        assert!(!aggregator.is_running());
    }

    #[test]
    fn stop_when_not_running_fails() {
        let aggregator = MetricsAggregator::new(Duration::from_secs(30), false);
        assert!(aggregator.stop().is_err());
    }

    #[tokio::test]
    async fn start_twice_is_refused_and_stop_ends_the_loop() {
        let aggregator = Arc::new(MetricsAggregator::new(Duration::from_secs(60), false));

        let runner = aggregator.clone();
        let handle = tokio::spawn(async move { runner.start().await });

        // Wait for the loop to come up.
        for _ in 0..100 {
            if aggregator.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(aggregator.is_running());

        let second = aggregator.start().await;
        assert!(second.is_err());

        aggregator.stop().unwrap();
        handle.await.unwrap().unwrap();
        assert!(!aggregator.is_running());
    }

    #[test]
    fn rollup_counts_and_health_thresholds() {
        let nodes = node_map(vec![node("a", true, 50), node("b", true, 50)]);
        let mut pods = HashMap::new();
        pods.insert(
            "default/web".to_string(),
            PodMetrics {
                phase: "Running".into(),
                ..Default::default()
            },
        );
        pods.insert(
            "default/job".to_string(),
            PodMetrics {
                phase: "Succeeded".into(),
                ..Default::default()
            },
        );

        let cluster = calculate_cluster_metrics(Utc::now(), &nodes, &pods);
        assert_eq!(cluster.total_nodes, 2);
        assert_eq!(cluster.healthy_nodes, 2);
        assert_eq!(cluster.total_pods, 2);
        assert_eq!(cluster.running_pods, 1);
        assert_eq!(cluster.cpu_usage_rate, 50.0);
        assert_eq!(cluster.health_status, "healthy");
    }

    #[test]
    fn rollup_goes_warning_then_critical() {
        // 85% CPU: an issue, but not critical.
        let warning = calculate_cluster_metrics(
            Utc::now(),
            &node_map(vec![node("a", true, 85)]),
            &HashMap::new(),
        );
        assert_eq!(warning.health_status, "warning");
        assert_eq!(warning.issues.len(), 1);

        // 95% CPU crosses the critical threshold.
        let critical = calculate_cluster_metrics(
            Utc::now(),
            &node_map(vec![node("a", true, 95)]),
            &HashMap::new(),
        );
        assert_eq!(critical.health_status, "critical");

        // Majority of nodes unhealthy is critical as well.
        let outage = calculate_cluster_metrics(
            Utc::now(),
            &node_map(vec![
                node("a", false, 10),
                node("b", false, 10),
                node("c", true, 10),
            ]),
            &HashMap::new(),
        );
        assert_eq!(outage.health_status, "critical");
    }

    #[test]
    fn gpu_availability_counts_low_usage_readings() {
        let mut gpu_node = node("a", true, 10);
        gpu_node.gpu_count = 4;
        gpu_node.gpu_usage = vec![10.0, 49.9, 50.0, 90.0];
        let cluster = calculate_cluster_metrics(
            Utc::now(),
            &node_map(vec![gpu_node]),
            &HashMap::new(),
        );
        assert_eq!(cluster.total_gpus, 4);
        assert_eq!(cluster.available_gpus, 2);
    }
}
