use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use config::{Config, Environment, File};
use tracing::info;
use tracing_subscriber::EnvFilter;

use cluster::ClusterClient;
use resources::config::AppConfig;

use crate::controller::Controller;

mod controller;

#[derive(Debug, Parser)]
#[command(name = "scheduler", about = "UAV scheduling reconciler")]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "./configs/config.yaml")]
    config: String,

    /// Reconcile interval
    #[arg(short, long, default_value = "15s", value_parser = humantime::parse_duration)]
    interval: Duration,
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

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.logging.level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let client = ClusterClient::new(&cfg.k8s)
        .await
        .context("failed to create cluster client")?;
    client
        .test_connection()
        .await
        .context("failed to connect to cluster")?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let controller = Controller::new(client, args.interval);
    controller.run(shutdown_rx).await?;

    info!("scheduler exited");
    Ok(())
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
}
