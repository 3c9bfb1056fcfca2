use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::AgentState;
use crate::report::Reporter;
use crate::simulator::Simulator;

mod api;
mod report;
mod simulator;

#[derive(Debug, Parser)]
#[command(name = "uav-agent", about = "Per-node UAV telemetry agent")]
struct Args {
    /// HTTP server port
    #[arg(short, long, default_value_t = 9090)]
    port: u16,

    /// Master server base URL for telemetry reports
    #[arg(long, env = "MASTER_URL", default_value = "")]
    master_url: String,

    /// Interval for uploading telemetry (e.g. 15s)
    #[arg(long, env = "REPORT_INTERVAL", value_parser = parse_interval, default_value = "15s")]
    report_interval: Duration,

    #[arg(long, env = "NODE_NAME", default_value = "unknown-node")]
    node_name: String,

    #[arg(long, env = "NODE_IP", default_value = "unknown-ip")]
    node_ip: String,
}

/// Accept `15s`-style durations and bare second counts.
fn parse_interval(raw: &str) -> Result<Duration, String> {
    if let Ok(seconds) = raw.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }
    humantime::parse_duration(raw).map_err(|err| err.to_string())
}

fn normalize_master_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let uav_id = format!("UAV-{}", args.node_name);
    let master_url = normalize_master_url(&args.master_url);

    info!("starting UAV agent");
    info!("uav id: {uav_id}");
    info!("node: {} ({})", args.node_name, args.node_ip);
    info!("port: {}", args.port);

    let simulator = Simulator::new(&uav_id, &args.node_name);
    let simulator_task = simulator.start();

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let report_task = if master_url.is_empty() {
        warn!("master url not configured, telemetry reporting disabled");
        None
    } else {
        info!(
            "telemetry reporting enabled: {master_url} (interval {:?})",
            args.report_interval
        );
        let reporter = Reporter::new(
            &master_url,
            args.report_interval,
            args.node_name.clone(),
            args.node_ip.clone(),
            uav_id.clone(),
        );
        let report_simulator = simulator.clone();
        let report_shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            reporter.run(report_simulator, report_shutdown).await;
        }))
    };

    let state = Arc::new(AgentState {
        simulator: simulator.clone(),
        uav_id,
        node_name: args.node_name.clone(),
        node_ip: args.node_ip.clone(),
    });

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("HTTP server listening on {addr}");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    let _ = shutdown_tx.send(true);
    simulator.stop();
    simulator_task.abort();
    if let Some(task) = report_task {
        let _ = task.await;
    }

    info!("UAV agent exited");
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
    info!("shutting down");
}
