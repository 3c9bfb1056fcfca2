//! Discovery and change streams for custom kinds. The definition endpoint
//! is watched continuously; every established definition gets its own
//! instance subscription, tracked in a registry so stop-then-spawn stays
//! atomic.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{
    api::{Api, ApiResource, DynamicObject, GroupVersionKind, ListParams, WatchEvent, WatchParams},
    Client,
};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use resources::objects::{CrdEvent, CrdInfo};

use crate::watch::{backoff_or_stop, EventHandler};
use crate::{convert, Result};

struct Subscription {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

type Registry = Arc<Mutex<HashMap<(String, String), Subscription>>>;

/// Watches custom resource definitions and fans out one instance stream
/// per established kind.
pub struct CrdWatcher {
    client: Client,
    handler: Arc<dyn EventHandler>,
    registry: Registry,
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl CrdWatcher {
    pub fn new(client: Client, handler: Arc<dyn EventHandler>) -> Self {
        let (stop_tx, _) = watch::channel(false);
        CrdWatcher {
            client,
            handler,
            registry: Arc::new(Mutex::new(HashMap::new())),
            stop_tx,
            task: None,
        }
    }

    /// Subscribe to existing established kinds, then follow the definition
    /// stream for new ones.
    pub async fn start(&mut self) -> Result<()> {
        info!("starting custom-kind watcher");

        let api: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        info!("discovered {} custom kind definitions", list.items.len());
        for crd in &list.items {
            let info = convert::crd_to_info(crd);
            if info.established {
                spawn_instance_watch(
                    self.client.clone(),
                    self.handler.clone(),
                    self.registry.clone(),
                    info,
                )
                .await;
            }
        }

        let client = self.client.clone();
        let handler = self.handler.clone();
        let registry = self.registry.clone();
        let mut stop = self.stop_tx.subscribe();
        self.task = Some(tokio::spawn(async move {
            loop {
                if *stop.borrow() {
                    return;
                }
                if let Err(err) =
                    run_definition_stream(&client, &handler, &registry, &mut stop).await
                {
                    warn!("definition watch failed: {err}");
                }
                if backoff_or_stop(&mut stop).await {
                    return;
                }
            }
        }));

        Ok(())
    }

    /// Stop the definition stream and every instance subscription.
    pub async fn stop(&mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        let mut registry = self.registry.lock().await;
        for (_, subscription) in registry.drain() {
            let _ = subscription.stop_tx.send(true);
            let _ = subscription.task.await;
        }
        info!("custom-kind watcher stopped");
    }
}

async fn run_definition_stream(
    client: &Client,
    handler: &Arc<dyn EventHandler>,
    registry: &Registry,
    stop: &mut watch::Receiver<bool>,
) -> Result<()> {
    let api: Api<CustomResourceDefinition> = Api::all(client.clone());
    let mut stream = api.watch(&WatchParams::default(), "0").await?.boxed();
    debug!("watching custom kind definitions");

    loop {
        tokio::select! {
            _ = stop.changed() => return Ok(()),
            item = stream.try_next() => match item? {
                Some(WatchEvent::Added(crd)) => {
                    let info = convert::crd_to_info(&crd);
                    dispatch_definition_event(handler.as_ref(), "Added", &info).await;
                    if info.established {
                        spawn_instance_watch(
                            client.clone(),
                            handler.clone(),
                            registry.clone(),
                            info,
                        )
                        .await;
                    }
                }
                Some(WatchEvent::Modified(crd)) => {
                    let info = convert::crd_to_info(&crd);
                    dispatch_definition_event(handler.as_ref(), "Modified", &info).await;
                }
                Some(WatchEvent::Deleted(crd)) => {
                    let info = convert::crd_to_info(&crd);
                    dispatch_definition_event(handler.as_ref(), "Deleted", &info).await;
                    let key = (info.group.clone(), info.plural.clone());
                    let mut registry = registry.lock().await;
                    if let Some(subscription) = registry.remove(&key) {
                        let _ = subscription.stop_tx.send(true);
                        subscription.task.abort();
                        info!("stopped instance watch for {}/{}", key.0, key.1);
                    }
                }
                Some(WatchEvent::Bookmark(_)) => {}
                Some(WatchEvent::Error(status)) => {
                    warn!("definition watch delivered error: {}", status.message);
                }
                None => return Ok(()),
            },
        }
    }
}

async fn dispatch_definition_event(handler: &dyn EventHandler, event_type: &str, info: &CrdInfo) {
    info!("custom kind definition {} {}", event_type, info.name);
    handler
        .on_crd_event(CrdEvent {
            r#type: event_type.to_string(),
            kind: "CustomResourceDefinition".to_string(),
            group: "apiextensions.k8s.io".to_string(),
            version: "v1".to_string(),
            name: info.name.clone(),
            namespace: String::new(),
            object: serde_json::to_value(info).unwrap_or_default(),
            timestamp: Utc::now(),
        })
        .await;
}

/// Start a stream for instances of one kind, replacing any existing
/// subscription for the same `(group, resource)` first.
async fn spawn_instance_watch(
    client: Client,
    handler: Arc<dyn EventHandler>,
    registry: Registry,
    info: CrdInfo,
) {
    let key = (info.group.clone(), info.plural.clone());
    let (stop_tx, stop_rx) = watch::channel(false);

    let mut registry_guard = registry.lock().await;
    if let Some(previous) = registry_guard.remove(&key) {
        let _ = previous.stop_tx.send(true);
        previous.task.abort();
        debug!("replaced instance watch for {}/{}", key.0, key.1);
    }

    info!("starting instance watch for {}/{}", key.0, key.1);
    let task = tokio::spawn(run_instance_watch(client, handler, info, stop_rx));
    registry_guard.insert(key, Subscription { stop_tx, task });
}

async fn run_instance_watch(
    client: Client,
    handler: Arc<dyn EventHandler>,
    info: CrdInfo,
    mut stop: watch::Receiver<bool>,
) {
    let version = info
        .versions
        .first()
        .cloned()
        .unwrap_or_else(|| "v1".to_string());
    let ar = ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk(&info.group, &version, &info.kind),
        &info.plural,
    );
    // Cluster scope and all-namespaces both watch the whole kind.
    let api: Api<DynamicObject> = Api::all_with(client, &ar);

    loop {
        if *stop.borrow() {
            return;
        }
        if let Err(err) = run_instance_stream(&api, handler.as_ref(), &info, &mut stop).await {
            warn!(
                "instance watch for {}/{} failed: {err}",
                info.group, info.plural
            );
        }
        if backoff_or_stop(&mut stop).await {
            return;
        }
    }
}

async fn run_instance_stream(
    api: &Api<DynamicObject>,
    handler: &dyn EventHandler,
    info: &CrdInfo,
    stop: &mut watch::Receiver<bool>,
) -> Result<()> {
    let mut stream = api.watch(&WatchParams::default(), "0").await?.boxed();
    debug!("watching instances of {}/{}", info.group, info.plural);

    loop {
        tokio::select! {
            _ = stop.changed() => return Ok(()),
            item = stream.try_next() => match item? {
                Some(WatchEvent::Added(obj)) => dispatch_instance(handler, "Added", info, obj).await,
                Some(WatchEvent::Modified(obj)) => dispatch_instance(handler, "Modified", info, obj).await,
                Some(WatchEvent::Deleted(obj)) => dispatch_instance(handler, "Deleted", info, obj).await,
                Some(WatchEvent::Bookmark(_)) => {}
                Some(WatchEvent::Error(status)) => {
                    warn!(
                        "instance watch for {}/{} delivered error: {}",
                        info.group, info.plural, status.message
                    );
                }
                None => return Ok(()),
            },
        }
    }
}

async fn dispatch_instance(
    handler: &dyn EventHandler,
    event_type: &str,
    info: &CrdInfo,
    obj: DynamicObject,
) {
    let resource = convert::dynamic_to_custom_resource(&obj, &info.group, &info.kind);
    debug!(
        "custom resource {} {}/{}",
        event_type, info.kind, resource.name
    );
    handler
        .on_crd_event(CrdEvent {
            r#type: event_type.to_string(),
            kind: info.kind.clone(),
            group: info.group.clone(),
            version: resource.version.clone(),
            name: resource.name.clone(),
            namespace: resource.namespace.clone(),
            object: serde_json::to_value(&obj).unwrap_or_default(),
            timestamp: Utc::now(),
        })
        .await;
}
