use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use config::{Config, Environment, File};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cluster::crd_watch::CrdWatcher;
use cluster::watch::Watcher;
use cluster::ClusterClient;
use resources::config::AppConfig;

use monitor_server::aggregator::MetricsAggregator;
use monitor_server::sources::{
    NetworkMetricsCollector, NodeMetricsCollector, PodMetricsCollector, UavMetricsCollector,
};
use monitor_server::state_handler::ClusterStateHandler;
use monitor_server::{handler, AppState};

#[derive(Debug, Parser)]
#[command(name = "monitor-server", about = "UAV cluster observability server")]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "./configs/config.yaml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let cfg = Config::builder()
        .add_source(File::with_name(&args.config))
        .add_source(Environment::default().separator("__"))
        .build()
        .with_context(|| format!("failed to load config from {}", args.config))?
        .try_deserialize::<AppConfig>()
        .context("failed to parse config")?;

    init_tracing(&cfg);
    info!(
        "starting UAV cluster monitor on {}:{}",
        cfg.server.host, cfg.server.port
    );

    let client = match ClusterClient::new(&cfg.k8s).await {
        Ok(client) => match client.test_connection().await {
            Ok(()) => Some(Arc::new(client)),
            Err(err) => {
                warn!("failed to connect to cluster: {err}");
                warn!("running in development mode without cluster access");
                None
            }
        },
        Err(err) => {
            warn!("failed to create cluster client: {err}");
            warn!("running in development mode without cluster access");
            None
        }
    };

    let aggregator = match client.as_ref() {
        Some(client) if cfg.metrics.enabled => {
            let aggregator = Arc::new(build_aggregator(&cfg, client));
            let runner = aggregator.clone();
            tokio::spawn(async move {
                if let Err(err) = runner.start().await {
                    error!("metrics aggregator exited: {err}");
                }
            });
            info!(
                "metrics collection started (interval: {}s)",
                cfg.metrics.collect_interval_seconds
            );
            Some(aggregator)
        }
        Some(_) => {
            info!("metrics collection is disabled in config");
            None
        }
        None => None,
    };

    let mut watcher = None;
    let mut crd_watcher = None;
    if let Some(client) = client.as_ref() {
        let handler = Arc::new(ClusterStateHandler::new());

        let mut core_watcher = Watcher::new(
            client.kube(),
            client.namespaces().to_vec(),
            handler.clone(),
        );
        core_watcher.start();
        watcher = Some(core_watcher);

        let mut custom_watcher = CrdWatcher::new(client.kube(), handler);
        if let Err(err) = custom_watcher.start().await {
            warn!("failed to start custom-kind watcher: {err}");
        } else {
            crd_watcher = Some(custom_watcher);
        }
    }

    let state = Arc::new(AppState {
        client,
        aggregator: aggregator.clone(),
    });

    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("HTTP server listening on {addr}");

    axum::serve(listener, handler::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Some(aggregator) = aggregator.as_ref() {
        if aggregator.is_running() {
            let _ = aggregator.stop();
        }
    }
    if let Some(mut watcher) = watcher.take() {
        watcher.stop().await;
    }
    if let Some(mut crd_watcher) = crd_watcher.take() {
        crd_watcher.stop().await;
    }

    info!("server exited");
    Ok(())
}

fn build_aggregator(cfg: &AppConfig, client: &Arc<ClusterClient>) -> MetricsAggregator {
    let metrics = &cfg.metrics;
    let mut aggregator = MetricsAggregator::new(
        Duration::from_secs(metrics.collect_interval_seconds),
        metrics.keep_last_on_error,
    );

    if metrics.enable_node {
        aggregator = aggregator.with_node_source(Box::new(NodeMetricsCollector::new(client.kube())));
        info!("node metrics collector enabled");
    }
    if metrics.enable_pod {
        aggregator = aggregator.with_pod_source(Box::new(PodMetricsCollector::new(
            client.kube(),
            metrics.namespaces.clone(),
        )));
        info!("pod metrics collector enabled");
    }
    if metrics.enable_network {
        aggregator = aggregator.with_network_source(Box::new(NetworkMetricsCollector::new(
            client.clone(),
            metrics.namespaces.clone(),
            metrics.network_max_pairs,
            Duration::from_secs(metrics.network_test_timeout_seconds),
        )));
        info!("network metrics collector enabled");
    }
    if metrics.enable_uav {
        let namespace = metrics
            .namespaces
            .first()
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        aggregator = aggregator.with_uav_source(Box::new(UavMetricsCollector::new(
            client.kube(),
            namespace,
            Duration::from_secs(5),
        )));
        info!("UAV metrics collector enabled");
    }

    aggregator
}

fn init_tracing(cfg: &AppConfig) {
    let default_level = if cfg.server.debug {
        "debug".to_string()
    } else {
        cfg.logging.level.clone()
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{default_level},kube_client=warn,hyper=warn")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutting down");
}
