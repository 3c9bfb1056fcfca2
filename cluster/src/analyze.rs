//! Inferential pass over a pod pair: reasons the two workloads might not
//! be able to talk, drawn from workload status, network policies, service
//! targeting, DNS health and the live probe result.

use serde::{Deserialize, Serialize};
use tracing::warn;

use resources::objects::{NetworkPolicyInfo, PodInfo, ServiceInfo};

use crate::probe::{parse_pod_ref, NetworkTestResult, RttTester};
use crate::{ClusterClient, Result};

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct CommunicationAnalysis {
    pub pod_a: String,
    pub pod_b: String,
    /// `connected`, `disconnected` or `unknown`.
    pub status: String,
    pub issues: Vec<String>,
    pub solutions: Vec<String>,
    pub confidence: f64,
}

pub struct NetworkAnalyzer<'a> {
    client: &'a ClusterClient,
}

impl<'a> NetworkAnalyzer<'a> {
    pub fn new(client: &'a ClusterClient) -> Self {
        NetworkAnalyzer { client }
    }

    pub async fn analyze_pod_communication(
        &self,
        pod_a: &str,
        pod_b: &str,
    ) -> Result<CommunicationAnalysis> {
        let (ns_a, name_a) = parse_pod_ref(pod_a);
        let (ns_b, name_b) = parse_pod_ref(pod_b);

        let info_a = self.client.get_pod(&ns_a, &name_a).await?;
        let info_b = self.client.get_pod(&ns_b, &name_b).await?;

        let mut analysis = CommunicationAnalysis {
            pod_a: pod_a.to_string(),
            pod_b: pod_b.to_string(),
            status: "unknown".to_string(),
            ..Default::default()
        };

        check_pod_status(&info_a, &mut analysis);
        check_pod_status(&info_b, &mut analysis);

        let mut policies = Vec::new();
        for namespace in namespaces_of(&info_a, &info_b) {
            match self.client.get_network_policies(&namespace).await {
                Ok(mut list) => policies.append(&mut list),
                Err(err) => {
                    warn!("failed to get network policies for namespace {namespace}: {err}")
                }
            }
        }
        check_network_policies(&info_a, &info_b, &policies, &mut analysis);

        match self.client.get_services(&info_b.namespace).await {
            Ok(services) => check_service_targeting(&info_b, &services, &mut analysis),
            Err(err) => warn!(
                "failed to get services for namespace {}: {err}",
                info_b.namespace
            ),
        }

        match self.client.get_pods("kube-system").await {
            Ok(system_pods) => check_dns(&system_pods, &mut analysis),
            Err(err) => warn!("failed to get kube-system pods: {err}"),
        }

        let tester = RttTester::new(self.client);
        let probe_result = tester.test_connectivity(&info_a, &info_b).await;
        check_probe_result(&probe_result, &mut analysis);

        determine_final_status(&mut analysis);
        Ok(analysis)
    }
}

fn namespaces_of(a: &PodInfo, b: &PodInfo) -> Vec<String> {
    let mut namespaces = vec![a.namespace.clone()];
    if b.namespace != a.namespace {
        namespaces.push(b.namespace.clone());
    }
    namespaces
}

pub fn check_pod_status(pod: &PodInfo, analysis: &mut CommunicationAnalysis) {
    if !pod.is_running() {
        analysis.issues.push(format!(
            "Pod {}/{} is not running (status: {})",
            pod.namespace, pod.name, pod.status
        ));
        analysis.solutions.push(format!(
            "Check Pod {}/{} logs and events for issues",
            pod.namespace, pod.name
        ));
    }
}

pub fn check_network_policies(
    pod_a: &PodInfo,
    pod_b: &PodInfo,
    policies: &[NetworkPolicyInfo],
    analysis: &mut CommunicationAnalysis,
) {
    for policy in policies {
        if policy.affects(pod_a) || policy.affects(pod_b) {
            analysis.issues.push(format!(
                "Network policy {}/{} may affect communication",
                policy.namespace, policy.name
            ));
            analysis.solutions.push(format!(
                "Review network policy {}/{} rules",
                policy.namespace, policy.name
            ));
        }
    }
}

pub fn check_service_targeting(
    pod_b: &PodInfo,
    services: &[ServiceInfo],
    analysis: &mut CommunicationAnalysis,
) {
    if !services.iter().any(|svc| svc.targets(pod_b)) {
        analysis.issues.push(format!(
            "No service found targeting Pod {}/{}",
            pod_b.namespace, pod_b.name
        ));
        analysis.solutions.push(format!(
            "Create a service to expose Pod {}/{}",
            pod_b.namespace, pod_b.name
        ));
    }
}

pub fn check_dns(system_pods: &[PodInfo], analysis: &mut CommunicationAnalysis) {
    let coredns_running = system_pods
        .iter()
        .any(|pod| pod.name.contains("coredns") && pod.is_running());
    if !coredns_running {
        analysis
            .issues
            .push("CoreDNS is not running properly".to_string());
        analysis
            .solutions
            .push("Check CoreDNS pods in kube-system namespace".to_string());
    }
}

pub fn check_probe_result(result: &NetworkTestResult, analysis: &mut CommunicationAnalysis) {
    if result.success_rate < 50.0 {
        analysis.issues.push(format!(
            "Poor connectivity, success rate only {:.1}%",
            result.success_rate
        ));
        analysis
            .solutions
            .push("Check network policies and firewall configuration".to_string());
    } else if result.success_rate < 100.0 {
        analysis.issues.push(format!(
            "Packet loss on the path, success rate {:.1}%",
            result.success_rate
        ));
        analysis
            .solutions
            .push("Check network quality and node status".to_string());
    }

    match result.latency.as_str() {
        "fair" => {
            analysis.issues.push(format!(
                "Moderate network latency, average RTT {:.2}ms",
                result.average_rtt
            ));
            analysis
                .solutions
                .push("Consider tuning the network or checking load".to_string());
        }
        "poor" | "very_poor" => {
            analysis.issues.push(format!(
                "High network latency, average RTT {:.2}ms",
                result.average_rtt
            ));
            analysis
                .solutions
                .push("Check network configuration and inter-node links".to_string());
        }
        _ => {}
    }
}

/// `connected` iff nothing was flagged; confidence decays with the number
/// of issues, floored at 0.3.
pub fn determine_final_status(analysis: &mut CommunicationAnalysis) {
    if analysis.issues.is_empty() {
        analysis.status = "connected".to_string();
        analysis.confidence = 0.9;
        analysis
            .solutions
            .push("No obvious issues detected".to_string());
    } else {
        analysis.status = "disconnected".to_string();
        analysis.confidence = (0.7 - 0.1 * analysis.issues.len() as f64).max(0.3);
    }
}
