//! Pulsecast binary.
//!
//! Runs as the supervisor, as a supervised worker (when `PULSECAST_WORKER_ID`
//! is set), or as a single in-process worker when clustering is disabled.

use anyhow::Context;
use pulsecast_cluster::config::worker_slot_from_env;
use pulsecast_cluster::signal::cancel_on_shutdown_signal;
use pulsecast_cluster::{run_worker, ClusterConfig, CommandSpawner, Supervisor};
use pulsecast_server::{Server, ServerConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Stdout carries worker reports, so logs go to stderr.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pulsecast_server=debug,pulsecast_cluster=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let server_config = ServerConfig::from_env().context("invalid server configuration")?;
    let cluster_config = ClusterConfig::from_env().context("invalid cluster configuration")?;

    let cancel = CancellationToken::new();
    cancel_on_shutdown_signal(cancel.clone()).context("failed to install signal handlers")?;

    if let Some(slot) = worker_slot_from_env()? {
        run_worker(server_config, slot, cancel).await?;
        return Ok(());
    }

    if !cluster_config.enabled {
        tracing::info!(
            host = %server_config.host,
            port = server_config.port,
            "starting single worker"
        );
        Server::from_config(server_config, cancel)?.run().await?;
        return Ok(());
    }

    tracing::info!(
        host = %server_config.host,
        port = server_config.port,
        workers = cluster_config.workers,
        "starting supervisor"
    );
    let mut supervisor = Supervisor::new(cluster_config, CommandSpawner::current_exe()?)?;
    if server_config.monitoring_enabled {
        supervisor = supervisor.with_stats_interval(server_config.stats_interval());
    }
    let report = supervisor.run(cancel).await;
    tracing::info!(
        graceful = report.graceful,
        forced = report.forced,
        abandoned = report.abandoned,
        "supervisor exiting"
    );

    Ok(())
}
