//! Long-lived change streams for the core workload kinds. Each
//! `(kind, namespace)` pair runs in its own task with its own reconnect
//! loop; transient stream errors are invisible to handlers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::{Event, Pod, Service};
use kube::{
    api::{Api, WatchEvent, WatchParams},
    Client,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use resources::objects::{CrdEvent, EventInfo, PodInfo, ServiceInfo};

use crate::convert;

/// Wait before reopening a closed stream.
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Callbacks invoked by the watch fabric. A slow handler blocks only the
/// stream that produced the event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_pod_update(&self, pod: PodInfo);
    async fn on_service_update(&self, service: ServiceInfo);
    async fn on_event(&self, event: EventInfo);
    async fn on_crd_event(&self, event: CrdEvent);
}

/// Watch fabric over the core kinds in the watched namespaces.
pub struct Watcher {
    client: Client,
    namespaces: Vec<String>,
    handler: Arc<dyn EventHandler>,
    stop_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Watcher {
    pub fn new(client: Client, namespaces: Vec<String>, handler: Arc<dyn EventHandler>) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Watcher {
            client,
            namespaces,
            handler,
            stop_tx,
            tasks: Vec::new(),
        }
    }

    /// Spawn one stream task per `(kind, namespace)`.
    pub fn start(&mut self) {
        info!("starting resource watcher for {:?}", self.namespaces);
        for namespace in self.namespaces.clone() {
            self.tasks.push(tokio::spawn(watch_pods(
                self.client.clone(),
                namespace.clone(),
                self.handler.clone(),
                self.stop_tx.subscribe(),
            )));
            self.tasks.push(tokio::spawn(watch_services(
                self.client.clone(),
                namespace.clone(),
                self.handler.clone(),
                self.stop_tx.subscribe(),
            )));
            self.tasks.push(tokio::spawn(watch_events(
                self.client.clone(),
                namespace,
                self.handler.clone(),
                self.stop_tx.subscribe(),
            )));
        }
    }

    /// Signal every stream to exit and wait for the tasks.
    pub async fn stop(&mut self) {
        let _ = self.stop_tx.send(true);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        info!("resource watcher stopped");
    }
}

/// Sleep through the reconnect backoff; true when stop fired instead.
pub(crate) async fn backoff_or_stop(stop: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(RECONNECT_BACKOFF) => false,
        _ = stop.changed() => true,
    }
}

async fn watch_pods(
    client: Client,
    namespace: String,
    handler: Arc<dyn EventHandler>,
    mut stop: watch::Receiver<bool>,
) {
    let api: Api<Pod> = Api::namespaced(client, &namespace);
    loop {
        if *stop.borrow() {
            return;
        }
        if let Err(err) = run_pod_stream(&api, &namespace, handler.as_ref(), &mut stop).await {
            warn!("pod watch in namespace {namespace} failed: {err}");
        }
        if backoff_or_stop(&mut stop).await {
            return;
        }
    }
}

async fn run_pod_stream(
    api: &Api<Pod>,
    namespace: &str,
    handler: &dyn EventHandler,
    stop: &mut watch::Receiver<bool>,
) -> crate::Result<()> {
    let mut stream = api.watch(&WatchParams::default(), "0").await?.boxed();
    debug!("watching pods in namespace {namespace}");
    loop {
        tokio::select! {
            _ = stop.changed() => return Ok(()),
            item = stream.try_next() => match item? {
                Some(WatchEvent::Added(pod))
                | Some(WatchEvent::Modified(pod))
                | Some(WatchEvent::Deleted(pod)) => {
                    handler.on_pod_update(convert::pod_to_info(&pod)).await;
                }
                Some(WatchEvent::Bookmark(_)) => {}
                Some(WatchEvent::Error(status)) => {
                    warn!("pod watch in namespace {namespace} delivered error: {}", status.message);
                }
                // Channel closed by the server; caller reconnects.
                None => return Ok(()),
            },
        }
    }
}

async fn watch_services(
    client: Client,
    namespace: String,
    handler: Arc<dyn EventHandler>,
    mut stop: watch::Receiver<bool>,
) {
    let api: Api<Service> = Api::namespaced(client, &namespace);
    loop {
        if *stop.borrow() {
            return;
        }
        if let Err(err) = run_service_stream(&api, &namespace, handler.as_ref(), &mut stop).await {
            warn!("service watch in namespace {namespace} failed: {err}");
        }
        if backoff_or_stop(&mut stop).await {
            return;
        }
    }
}

async fn run_service_stream(
    api: &Api<Service>,
    namespace: &str,
    handler: &dyn EventHandler,
    stop: &mut watch::Receiver<bool>,
) -> crate::Result<()> {
    let mut stream = api.watch(&WatchParams::default(), "0").await?.boxed();
    debug!("watching services in namespace {namespace}");
    loop {
        tokio::select! {
            _ = stop.changed() => return Ok(()),
            item = stream.try_next() => match item? {
                Some(WatchEvent::Added(svc))
                | Some(WatchEvent::Modified(svc))
                | Some(WatchEvent::Deleted(svc)) => {
                    handler.on_service_update(convert::service_to_info(&svc)).await;
                }
                Some(WatchEvent::Bookmark(_)) => {}
                Some(WatchEvent::Error(status)) => {
                    warn!("service watch in namespace {namespace} delivered error: {}", status.message);
                }
                None => return Ok(()),
            },
        }
    }
}

async fn watch_events(
    client: Client,
    namespace: String,
    handler: Arc<dyn EventHandler>,
    mut stop: watch::Receiver<bool>,
) {
    let api: Api<Event> = Api::namespaced(client, &namespace);
    loop {
        if *stop.borrow() {
            return;
        }
        if let Err(err) = run_event_stream(&api, &namespace, handler.as_ref(), &mut stop).await {
            warn!("event watch in namespace {namespace} failed: {err}");
        }
        if backoff_or_stop(&mut stop).await {
            return;
        }
    }
}

async fn run_event_stream(
    api: &Api<Event>,
    namespace: &str,
    handler: &dyn EventHandler,
    stop: &mut watch::Receiver<bool>,
) -> crate::Result<()> {
    let mut stream = api.watch(&WatchParams::default(), "0").await?.boxed();
    debug!("watching events in namespace {namespace}");
    loop {
        tokio::select! {
            _ = stop.changed() => return Ok(()),
            item = stream.try_next() => match item? {
                // Only new events are interesting; modifications are count
                // bumps on the same record.
                Some(WatchEvent::Added(event)) => {
                    handler.on_event(convert::event_to_info(&event)).await;
                }
                Some(WatchEvent::Modified(_)) | Some(WatchEvent::Deleted(_)) => {}
                Some(WatchEvent::Bookmark(_)) => {}
                Some(WatchEvent::Error(status)) => {
                    warn!("event watch in namespace {namespace} delivered error: {}", status.message);
                }
                None => return Ok(()),
            },
        }
    }
}
