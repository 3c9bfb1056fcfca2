//! Watch-fabric handler keeping a live store of workloads and services,
//! keyed by `namespace/name`.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info};

use cluster::EventHandler;
use resources::objects::{CrdEvent, EventInfo, PodInfo, ServiceInfo};

#[derive(Default)]
pub struct ClusterStateHandler {
    pods: DashMap<String, PodInfo>,
    services: DashMap<String, ServiceInfo>,
    events_seen: AtomicU64,
    crd_events_seen: AtomicU64,
}

impl ClusterStateHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pod(&self, key: &str) -> Option<PodInfo> {
        self.pods.get(key).map(|entry| entry.clone())
    }

    pub fn service(&self, key: &str) -> Option<ServiceInfo> {
        self.services.get(key).map(|entry| entry.clone())
    }

    pub fn pod_count(&self) -> usize {
        self.pods.len()
    }

    pub fn events_seen(&self) -> u64 {
        self.events_seen.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EventHandler for ClusterStateHandler {
    async fn on_pod_update(&self, pod: PodInfo) {
        debug!("pod {} -> {}", pod.key(), pod.status);
        self.pods.insert(pod.key(), pod);
    }

    async fn on_service_update(&self, service: ServiceInfo) {
        debug!("service {}/{}", service.namespace, service.name);
        self.services
            .insert(format!("{}/{}", service.namespace, service.name), service);
    }

    async fn on_event(&self, event: EventInfo) {
        self.events_seen.fetch_add(1, Ordering::Relaxed);
        debug!("event {} {}: {}", event.r#type, event.reason, event.message);
    }

    async fn on_crd_event(&self, event: CrdEvent) {
        self.crd_events_seen.fetch_add(1, Ordering::Relaxed);
        info!(
            "custom resource {} {} {}/{}",
            event.r#type, event.kind, event.namespace, event.name
        );
    }
}
