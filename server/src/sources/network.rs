//! Network-probe source: picks a bounded set of workload pairs each cycle
//! (cross-node pairs first) and measures them with the exec-based probe,
//! at most three tests in flight.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use cluster::probe::{NetworkTestResult, RttTester};
use cluster::ClusterClient;
use resources::metrics::NetworkMetrics;
use resources::objects::PodInfo;

use super::{MetricsSource, NetworkMetricsList};

const PROBE_CONCURRENCY: usize = 3;

pub struct NetworkMetricsCollector {
    client: Arc<ClusterClient>,
    namespaces: Vec<String>,
    max_pairs: usize,
    test_timeout: Duration,
}

impl NetworkMetricsCollector {
    pub fn new(
        client: Arc<ClusterClient>,
        namespaces: Vec<String>,
        max_pairs: usize,
        test_timeout: Duration,
    ) -> Self {
        let namespaces = if namespaces.is_empty() {
            vec!["default".to_string()]
        } else {
            namespaces
        };
        NetworkMetricsCollector {
            client,
            namespaces,
            max_pairs: if max_pairs == 0 { 10 } else { max_pairs },
            test_timeout: if test_timeout.is_zero() {
                Duration::from_secs(10)
            } else {
                test_timeout
            },
        }
    }

    async fn probe_candidates(&self) -> Vec<PodInfo> {
        let mut pods = Vec::new();
        for namespace in &self.namespaces {
            match self.client.get_pods(namespace).await {
                Ok(list) => pods.extend(
                    list.into_iter()
                        .filter(|pod| pod.is_running() && !pod.ip.is_empty()),
                ),
                Err(err) => warn!("failed to list pods in namespace {namespace}: {err}"),
            }
        }
        pods
    }

    async fn test_pair(&self, source: PodInfo, target: PodInfo) -> NetworkMetrics {
        let tester = RttTester::new(self.client.as_ref());
        let test = tester.test_connectivity(&source, &target);
        match tokio::time::timeout(self.test_timeout, test).await {
            Ok(result) => metric_from_test(&source, &target, &result),
            Err(_) => {
                warn!(
                    "connectivity test timed out: {} -> {}",
                    source.key(),
                    target.key()
                );
                NetworkMetrics {
                    source_pod: source.key(),
                    target_pod: target.key(),
                    timestamp: Some(Utc::now()),
                    connected: false,
                    error: "connectivity test timed out".to_string(),
                    test_method: "mixed".to_string(),
                    ..Default::default()
                }
            }
        }
    }
}

#[async_trait]
impl MetricsSource for NetworkMetricsCollector {
    type Output = NetworkMetricsList;

    async fn collect(&self) -> cluster::Result<NetworkMetricsList> {
        let pods = self.probe_candidates().await;
        let pairs = select_pairs(&pods, self.max_pairs);
        if pairs.is_empty() {
            info!("no pod pairs found for network testing");
            return Ok(Vec::new());
        }
        info!("selected {} pod pairs for network testing", pairs.len());

        let semaphore = Arc::new(Semaphore::new(PROBE_CONCURRENCY));
        let tests = pairs.into_iter().map(|(source, target)| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore.acquire().await.ok()?;
                Some(self.test_pair(source, target).await)
            }
        });

        let results: NetworkMetricsList = join_all(tests).await.into_iter().flatten().collect();
        debug!("network metrics collection completed: {} tests", results.len());
        Ok(results)
    }
}

/// Candidate pairs in listing order: cross-node pairs first, then
/// intra-node fill, never more than `max_pairs`.
pub fn select_pairs(pods: &[PodInfo], max_pairs: usize) -> Vec<(PodInfo, PodInfo)> {
    if pods.len() < 2 || max_pairs == 0 {
        return Vec::new();
    }

    let mut pairs = Vec::new();
    for i in 0..pods.len() {
        for j in (i + 1)..pods.len() {
            if pairs.len() >= max_pairs {
                return pairs;
            }
            if pods[i].node_name != pods[j].node_name {
                pairs.push((pods[i].clone(), pods[j].clone()));
            }
        }
    }

    for i in 0..pods.len() {
        for j in (i + 1)..pods.len() {
            if pairs.len() >= max_pairs {
                return pairs;
            }
            if pods[i].node_name == pods[j].node_name {
                pairs.push((pods[i].clone(), pods[j].clone()));
            }
        }
    }

    pairs
}

/// Fold a probe battery into one network metric. Packet loss comes from
/// the ping leg; a successful HTTP timing overrides the reported RTT.
pub fn metric_from_test(
    source: &PodInfo,
    target: &PodInfo,
    result: &NetworkTestResult,
) -> NetworkMetrics {
    let mut metric = NetworkMetrics {
        source_pod: source.key(),
        target_pod: target.key(),
        timestamp: Some(Utc::now()),
        connected: false,
        test_method: "mixed".to_string(),
        ..Default::default()
    };

    if result.success_rate > 0.0 {
        metric.connected = true;
        metric.rtt = result.average_rtt;

        if let Some(ping) = result
            .rtt_results
            .iter()
            .find(|r| r.method == "ping" && r.success)
        {
            metric.packet_loss = ping.packet_loss;
            metric.test_method = "ping".to_string();
        }
        if let Some(http) = result
            .rtt_results
            .iter()
            .find(|r| r.method == "http" && r.success)
        {
            metric.rtt = http.rtt;
            metric.test_method = "http".to_string();
        }
    } else {
        metric.error = "all tests failed".to_string();
    }

    metric
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster::probe::RttResult;

    fn pod(name: &str, node: &str) -> PodInfo {
        PodInfo {
            name: name.into(),
            namespace: "default".into(),
            status: "Running".into(),
            node_name: node.into(),
            ip: format!("10.0.0.{}", name.len()),
            ..Default::default()
        }
    }

    #[test]
    fn cross_node_pairs_come_first() {
        let pods = vec![pod("a", "node-1"), pod("b", "node-1"), pod("c", "node-2")];
        let pairs = select_pairs(&pods, 10);
        // a-c and b-c cross nodes, a-b fills.
        assert_eq!(pairs.len(), 3);
        assert_ne!(pairs[0].0.node_name, pairs[0].1.node_name);
        assert_ne!(pairs[1].0.node_name, pairs[1].1.node_name);
        assert_eq!(pairs[2].0.node_name, pairs[2].1.node_name);
    }

    #[test]
    fn pair_count_is_capped() {
        let pods: Vec<PodInfo> = (0..6)
            .map(|i| pod(&format!("pod-{i}"), &format!("node-{}", i % 3)))
            .collect();
        assert_eq!(select_pairs(&pods, 4).len(), 4);
    }

    #[test]
    fn fewer_than_two_pods_yield_no_pairs() {
        assert!(select_pairs(&[], 5).is_empty());
        assert!(select_pairs(&[pod("a", "node-1")], 5).is_empty());
    }

    #[test]
    fn successful_test_maps_to_connected_metric() {
        let result = NetworkTestResult {
            success_rate: 100.0,
            average_rtt: 1.2,
            rtt_results: vec![
                RttResult {
                    success: true,
                    rtt: 0.4,
                    packet_loss: 0.0,
                    method: "ping".into(),
                    ..Default::default()
                },
                RttResult {
                    success: true,
                    rtt: 5.0,
                    method: "http".into(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let metric = metric_from_test(&pod("a", "n1"), &pod("b", "n2"), &result);
        assert!(metric.connected);
        // HTTP result overrides the averaged RTT.
        assert_eq!(metric.rtt, 5.0);
        assert_eq!(metric.test_method, "http");
        assert_eq!(metric.quality(), "excellent");
    }

    #[test]
    fn failed_test_maps_to_disconnected_metric() {
        let result = NetworkTestResult::default();
        let metric = metric_from_test(&pod("a", "n1"), &pod("b", "n2"), &result);
        assert!(!metric.connected);
        assert_eq!(metric.rtt, 0.0);
        assert_eq!(metric.error, "all tests failed");
        assert_eq!(metric.quality(), "disconnected");
    }
}
