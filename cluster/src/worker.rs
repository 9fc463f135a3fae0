//! Worker process bootstrap.
//!
//! A worker binds the shared port with `SO_REUSEPORT`, reports `ready` on
//! stdout once listening, and then reports its registry figures on every
//! stats interval until it is cancelled.

use std::time::Duration;

use pulsecast_server::health::ResourceSampler;
use pulsecast_server::{HubHandle, Server, ServerConfig, ServerError};
use tokio::io::AsyncWrite;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::report::WorkerReport;

/// Runs one worker until `cancel` fires.
///
/// # Errors
///
/// Returns an error if the server cannot be built, bound or served.
pub async fn run_worker(
    config: ServerConfig,
    slot: usize,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    let server = Server::from_config(config, cancel.clone())?;
    let listener = server.bind(true).await?;
    let pid = std::process::id();
    info!(slot, pid, addr = %listener.local_addr()?, "worker listening");

    let mut stdout = tokio::io::stdout();
    if let Err(e) = (WorkerReport::Ready { pid }).emit(&mut stdout).await {
        warn!(slot, error = %e, "failed to report readiness");
    }

    let reporter = server.config().monitoring_enabled.then(|| {
        tokio::spawn(report_stats(
            server.handle(),
            server.config().stats_interval(),
            cancel.clone(),
            stdout,
        ))
    });

    let result = server.serve(listener).await;
    if let Some(task) = reporter {
        task.abort();
    }
    info!(slot, pid, "worker exiting");
    result
}

/// Writes a `stats` report every `every` until cancelled or the hub stops.
async fn report_stats<W>(hub: HubHandle, every: Duration, cancel: CancellationToken, mut out: W)
where
    W: AsyncWrite + Unpin,
{
    let sampler = ResourceSampler::new();
    let pid = std::process::id();
    let mut ticker = time::interval_at(Instant::now() + every, every);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Ok(stats) = hub.stats().await else { break };
                let memory_bytes = sampler.sample().await.memory_bytes;
                let report = WorkerReport::Stats { pid, stats, memory_bytes };
                if let Err(e) = report.emit(&mut out).await {
                    warn!(error = %e, "supervisor pipe closed");
                    break;
                }
            }
        }
    }
    debug!("stats reporter stopped");
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use pulsecast_server::ws::Hub;
    use pulsecast_server::{AuthConfig, WsMetrics};
    use tokio::io::{AsyncBufReadExt, BufReader};

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_stats_reports_stream() {
        let cancel = CancellationToken::new();
        let (hub, handle) = Hub::new(
            Duration::from_secs(30),
            Arc::new(WsMetrics::new()),
            cancel.clone(),
        );
        hub.spawn();
        let (writer, reader) = tokio::io::duplex(4096);
        let task = tokio::spawn(report_stats(
            handle,
            Duration::from_millis(20),
            cancel.clone(),
            writer,
        ));

        let mut lines = BufReader::new(reader).lines();
        let line = time::timeout(WAIT, lines.next_line())
            .await
            .expect("report in time")
            .expect("read")
            .expect("line");

        match WorkerReport::parse(&line) {
            Some(WorkerReport::Stats { pid, stats, .. }) => {
                assert_eq!(pid, std::process::id());
                assert_eq!(stats.total_connections, 0);
            }
            other => panic!("unexpected report: {other:?}"),
        }

        cancel.cancel();
        time::timeout(WAIT, task).await.expect("stopped").expect("join");
    }

    #[tokio::test]
    async fn test_run_worker_stops_on_cancel() {
        let config = ServerConfig::new("127.0.0.1", 0)
            .with_monitoring(false)
            .with_auth(AuthConfig::Static {
                tokens: BTreeMap::from([("t".to_string(), "u".to_string())]),
            });
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_worker(config, 0, cancel.clone()));

        time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let result = time::timeout(WAIT, task).await.expect("stopped").expect("join");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_run_worker_rejects_missing_auth() {
        let result = run_worker(
            ServerConfig::new("127.0.0.1", 0),
            0,
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(ServerError::Config(_))));
    }
}
