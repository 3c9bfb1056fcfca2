//! Telemetry push loop: one report immediately, then one per interval.
//! Delivery failures are logged and never end the loop.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, warn};

use resources::objects::uav::UavReport;

use crate::simulator::Simulator;

pub struct Reporter {
    endpoint: String,
    interval: Duration,
    node_name: String,
    node_ip: String,
    uav_id: String,
    client: reqwest::Client,
}

impl Reporter {
    pub fn new(
        master_url: &str,
        interval: Duration,
        node_name: String,
        node_ip: String,
        uav_id: String,
    ) -> Self {
        Reporter {
            endpoint: format!("{}/api/v1/uav/report", master_url.trim_end_matches('/')),
            interval,
            node_name,
            node_ip,
            uav_id,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
        }
    }

    pub async fn run(&self, simulator: Simulator, mut shutdown: watch::Receiver<bool>) {
        self.send(&simulator).await;

        let mut ticker = tokio::time::interval(self.interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    debug!("report loop stopped");
                    return;
                }
                _ = ticker.tick() => self.send(&simulator).await,
            }
        }
    }

    async fn send(&self, simulator: &Simulator) {
        let report = UavReport {
            node_name: self.node_name.clone(),
            node_ip: self.node_ip.clone(),
            uav_id: self.uav_id.clone(),
            source: "agent".to_string(),
            status: "active".to_string(),
            timestamp: Some(Utc::now()),
            heartbeat_interval_seconds: self.interval.as_secs().max(1),
            state: Some(simulator.state()),
            metadata: HashMap::from([("agent".to_string(), "uav-agent".to_string())]),
        };

        match self.client.post(&self.endpoint).json(&report).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("telemetry report delivered (status {})", response.status());
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                warn!("telemetry report rejected ({status}): {}", body.trim());
            }
            Err(err) => warn!("failed to send telemetry report to {}: {err}", self.endpoint),
        }
    }
}
