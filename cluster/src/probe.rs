//! Pod-to-pod latency probe. Tests run inside live workload containers via
//! the cluster exec channel: ping in both directions, plus an HTTP timing
//! when the target looks like a web server.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use resources::objects::PodInfo;

use crate::{ClusterClient, Result};

/// Seam for running a shell command inside a workload. The production
/// implementation goes through the cluster exec channel; tests inject
/// canned output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, namespace: &str, pod: &str, command: &str) -> Result<String>;
}

#[async_trait]
impl CommandRunner for ClusterClient {
    async fn run(&self, namespace: &str, pod: &str, command: &str) -> Result<String> {
        let (stdout, _stderr) = self
            .exec_in_pod(namespace, pod, None, &["sh", "-c", command])
            .await?;
        Ok(stdout)
    }
}

/// One test from one workload to another.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct RttResult {
    pub success: bool,
    #[serde(rename = "rtt_ms")]
    pub rtt: f64,
    /// 0-100.
    pub packet_loss: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
    pub timestamp: Option<DateTime<Utc>>,
    /// `ping`, `ping_reverse` or `http`.
    pub method: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct NetworkTestResult {
    pub pod_a: String,
    pub pod_b: String,
    pub rtt_results: Vec<RttResult>,
    #[serde(rename = "average_rtt_ms")]
    pub average_rtt: f64,
    pub success_rate: f64,
    pub test_count: usize,
    /// `excellent`, `good`, `fair`, `poor`, `very_poor` or `unknown`.
    #[serde(rename = "latency_assessment")]
    pub latency: String,
}

/// Split a `namespace/name` reference; a bare name lands in `default`.
pub fn parse_pod_ref(reference: &str) -> (String, String) {
    match reference.split_once('/') {
        Some((namespace, name)) => (namespace.to_string(), name.to_string()),
        None => ("default".to_string(), reference.to_string()),
    }
}

pub struct RttTester<'a, R: CommandRunner + ?Sized> {
    runner: &'a R,
}

impl<'a, R: CommandRunner + ?Sized> RttTester<'a, R> {
    pub fn new(runner: &'a R) -> Self {
        RttTester { runner }
    }

    /// Run the full test battery between two resolved workloads and fold
    /// the statistics.
    pub async fn test_connectivity(&self, pod_a: &PodInfo, pod_b: &PodInfo) -> NetworkTestResult {
        let mut result = NetworkTestResult {
            pod_a: pod_a.key(),
            pod_b: pod_b.key(),
            ..Default::default()
        };

        if !pod_b.ip.is_empty() {
            let mut rtt = self.ping_from_pod(pod_a, &pod_b.ip).await;
            rtt.method = "ping".to_string();
            result.rtt_results.push(rtt);
            result.test_count += 1;
        }

        if !pod_a.ip.is_empty() {
            let mut rtt = self.ping_from_pod(pod_b, &pod_a.ip).await;
            rtt.method = "ping_reverse".to_string();
            result.rtt_results.push(rtt);
            result.test_count += 1;
        }

        if is_http_service(pod_b) && !pod_b.ip.is_empty() {
            let mut rtt = self.http_from_pod(pod_a, &pod_b.ip, 80).await;
            rtt.method = "http".to_string();
            result.rtt_results.push(rtt);
            result.test_count += 1;
        }

        calculate_stats(&mut result);
        result
    }

    async fn ping_from_pod(&self, pod: &PodInfo, target_ip: &str) -> RttResult {
        let command = format!("ping -c 3 -W 5 {target_ip}");
        let mut result = RttResult {
            timestamp: Some(Utc::now()),
            method: "ping".to_string(),
            ..Default::default()
        };

        match self.runner.run(&pod.namespace, &pod.name, &command).await {
            Ok(output) => {
                parse_ping_output(&output, &mut result);
                debug!(
                    "ping {} -> {}: rtt={:.2}ms loss={:.1}%",
                    pod.name, target_ip, result.rtt, result.packet_loss
                );
            }
            Err(err) => {
                result.error_message = format!("ping command failed: {err}");
                warn!("ping from pod {} to {target_ip} failed: {err}", pod.name);
            }
        }
        result
    }

    async fn http_from_pod(&self, pod: &PodInfo, target_ip: &str, port: u16) -> RttResult {
        let command =
            format!("curl -s -o /dev/null -w %{{time_total}} -m 5 http://{target_ip}:{port}");
        let mut result = RttResult {
            timestamp: Some(Utc::now()),
            method: "http".to_string(),
            ..Default::default()
        };

        match self.runner.run(&pod.namespace, &pod.name, &command).await {
            Ok(output) => {
                parse_http_output(&output, &mut result);
                debug!("http {} -> {target_ip}:{port}: rtt={:.2}ms", pod.name, result.rtt);
            }
            Err(err) => {
                result.error_message = format!("http request failed: {err}");
                warn!("http from pod {} to {target_ip}:{port} failed: {err}", pod.name);
            }
        }
        result
    }
}

/// Resolve both workloads and probe them. `NotFound` when either side is
/// missing.
pub async fn test_pod_connectivity(
    client: &ClusterClient,
    pod_a: &str,
    pod_b: &str,
) -> Result<NetworkTestResult> {
    let (ns_a, name_a) = parse_pod_ref(pod_a);
    let (ns_b, name_b) = parse_pod_ref(pod_b);

    let info_a = client.get_pod(&ns_a, &name_a).await?;
    let info_b = client.get_pod(&ns_b, &name_b).await?;

    let tester = RttTester::new(client);
    Ok(tester.test_connectivity(&info_a, &info_b).await)
}

/// Extract average RTT and packet loss from ping output. A test succeeds
/// iff at least one RTT sample was parsed; non-matching (e.g. localized)
/// output counts as failure.
pub fn parse_ping_output(output: &str, result: &mut RttResult) {
    let mut rtt_sum = 0.0;
    let mut rtt_count = 0u32;

    for line in output.lines() {
        if line.contains("time=") && line.contains("ms") {
            if let Some(rtt) = extract_rtt(line) {
                rtt_sum += rtt;
                rtt_count += 1;
            }
        }
        if line.contains("packet loss") {
            result.packet_loss = extract_packet_loss(line);
        }
    }

    if rtt_count > 0 {
        result.rtt = rtt_sum / rtt_count as f64;
        result.success = true;
    }
}

/// curl's `%{time_total}` is seconds; convert to milliseconds.
pub fn parse_http_output(output: &str, result: &mut RttResult) {
    if let Ok(seconds) = output.trim().parse::<f64>() {
        result.rtt = seconds * 1000.0;
        result.success = true;
        result.packet_loss = 0.0;
    }
}

fn extract_rtt(line: &str) -> Option<f64> {
    let after = line.split("time=").nth(1)?;
    let token = after.split_whitespace().next()?;
    let token = token.trim_end_matches("ms");
    let rtt: f64 = token.parse().ok()?;
    (rtt > 0.0).then_some(rtt)
}

fn extract_packet_loss(line: &str) -> f64 {
    line.split_whitespace()
        .find(|part| part.contains('%'))
        .and_then(|part| part.trim_end_matches('%').parse().ok())
        .unwrap_or(0.0)
}

/// True when the workload looks like an HTTP server worth a curl timing.
pub fn is_http_service(pod: &PodInfo) -> bool {
    const HTTP_APPS: [&str; 4] = ["nginx", "httpd", "apache", "web"];

    if let Some(app) = pod.labels.get("app") {
        let app = app.to_lowercase();
        if HTTP_APPS.iter().any(|candidate| app.contains(candidate)) {
            return true;
        }
    }

    pod.containers.iter().any(|container| {
        let image = container.image.to_lowercase();
        image.contains("nginx") || image.contains("httpd")
    })
}

fn calculate_stats(result: &mut NetworkTestResult) {
    if result.rtt_results.is_empty() {
        result.latency = "unknown".to_string();
        return;
    }

    let successful: Vec<&RttResult> = result.rtt_results.iter().filter(|r| r.success).collect();
    if successful.is_empty() {
        result.average_rtt = 0.0;
        result.success_rate = 0.0;
    } else {
        result.average_rtt =
            successful.iter().map(|r| r.rtt).sum::<f64>() / successful.len() as f64;
        result.success_rate = successful.len() as f64 / result.rtt_results.len() as f64 * 100.0;
    }

    result.latency = assess_latency(result.average_rtt).to_string();
}

pub fn assess_latency(rtt: f64) -> &'static str {
    match rtt {
        rtt if rtt == 0.0 => "unknown",
        rtt if rtt < 1.0 => "excellent",
        rtt if rtt < 5.0 => "good",
        rtt if rtt < 50.0 => "fair",
        rtt if rtt < 100.0 => "poor",
        _ => "very_poor",
    }
}
