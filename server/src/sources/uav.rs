//! UAV pull source: finds running agent pods by label and pulls each
//! agent's state endpoint. One unreachable agent never fails the cycle.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Api, ListParams},
    Client,
};
use serde::Deserialize;
use tracing::{debug, info, warn};

use resources::objects::uav::UavState;

use super::{MetricsSource, UavStateMap};

pub const DEFAULT_UAV_LABEL: &str = "app=uav-agent";
pub const AGENT_PORT: u16 = 9090;

#[derive(Debug, Deserialize)]
struct StateEnvelope {
    #[allow(dead_code)]
    status: String,
    data: Option<UavState>,
}

pub struct UavMetricsCollector {
    client: Client,
    http: reqwest::Client,
    namespace: String,
    label_selector: String,
}

impl UavMetricsCollector {
    pub fn new(client: Client, namespace: String, timeout: Duration) -> Self {
        let namespace = if namespace.is_empty() {
            "default".to_string()
        } else {
            namespace
        };
        let timeout = if timeout.is_zero() {
            Duration::from_secs(5)
        } else {
            timeout
        };
        UavMetricsCollector {
            client,
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            namespace,
            label_selector: DEFAULT_UAV_LABEL.to_string(),
        }
    }

    async fn pull_agent(&self, pod_name: &str, pod_ip: &str) -> Result<UavState, String> {
        let url = format!("http://{pod_ip}:{AGENT_PORT}/api/v1/state");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|err| format!("request failed: {err}"))?;
        if !response.status().is_success() {
            return Err(format!("unexpected status code: {}", response.status()));
        }
        let envelope: StateEnvelope = response
            .json()
            .await
            .map_err(|err| format!("failed to decode response: {err}"))?;
        let state = envelope.data.ok_or("no data in response")?;
        debug!("collected UAV state from {pod_name}");
        Ok(state)
    }
}

#[async_trait]
impl MetricsSource for UavMetricsCollector {
    type Output = UavStateMap;

    async fn collect(&self) -> cluster::Result<UavStateMap> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let params = ListParams::default()
            .labels(&self.label_selector)
            .fields("status.phase=Running");
        let list = pods.list(&params).await?;

        if list.items.is_empty() {
            warn!("no running UAV agent pods found");
            return Ok(HashMap::new());
        }

        let agents: Vec<(String, String, String)> = list
            .items
            .iter()
            .filter_map(|pod| {
                let name = pod.metadata.name.clone()?;
                let node = pod.spec.as_ref()?.node_name.clone()?;
                let ip = pod.status.as_ref()?.pod_ip.clone()?;
                (!ip.is_empty()).then_some((name, node, ip))
            })
            .collect();

        let total = agents.len();
        let pulls = agents.into_iter().map(|(name, node, ip)| async move {
            match self.pull_agent(&name, &ip).await {
                Ok(state) => Some((node, state)),
                Err(err) => {
                    warn!("failed to collect UAV metrics from node {node}: {err}");
                    None
                }
            }
        });

        let result: UavStateMap = join_all(pulls).await.into_iter().flatten().collect();
        info!("UAV metrics collection completed: {}/{} successful", result.len(), total);
        Ok(result)
    }
}
