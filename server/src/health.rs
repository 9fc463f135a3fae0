//! `/health` and `/metrics` endpoints.
//!
//! Both are served on the connection listener. `/health` returns a JSON
//! snapshot; `/metrics` renders the same snapshot as flat `key value` lines.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use pulsecast_sdk::RegistryStats;
use serde::Serialize;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::Mutex;
use tracing::warn;

use crate::ws::{HubError, HubHandle, WsMetrics, WsMetricsSnapshot};

/// Content type of the flat exposition.
pub const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Resource usage of the current process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessUsage {
    /// Resident memory in bytes.
    pub memory_bytes: u64,
    /// Virtual memory in bytes.
    pub virtual_memory_bytes: u64,
    /// CPU usage since the previous sample, in percent of one core.
    pub cpu_percent: f32,
}

/// Samples resource usage of the current process.
#[derive(Debug)]
pub struct ResourceSampler {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl Default for ResourceSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler {
    /// Creates a sampler for the current process.
    #[must_use]
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!(error = e, "process inspection unavailable");
                None
            }
        };
        Self {
            system: Mutex::new(System::new()),
            pid,
        }
    }

    /// Refreshes and returns current usage; zeros if unavailable.
    pub async fn sample(&self) -> ProcessUsage {
        let Some(pid) = self.pid else {
            return ProcessUsage::default();
        };

        let mut system = self.system.lock().await;
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system
            .process(pid)
            .map(|process| ProcessUsage {
                memory_bytes: process.memory(),
                virtual_memory_bytes: process.virtual_memory(),
                cpu_percent: process.cpu_usage(),
            })
            .unwrap_or_default()
    }
}

/// Point-in-time view of one worker.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    /// Always `"healthy"` while the hub answers.
    pub status: String,
    /// Snapshot time.
    pub timestamp: DateTime<Utc>,
    /// Worker process id.
    pub pid: u32,
    /// Seconds since the worker started.
    pub uptime_secs: u64,
    /// Registry statistics.
    pub connections: RegistryStats,
    /// Process resource usage.
    pub process: ProcessUsage,
    /// Lifetime counters.
    pub counters: WsMetricsSnapshot,
}

impl HealthSnapshot {
    /// Renders the snapshot as `pulsecast_*` key/value lines.
    #[must_use]
    pub fn render_metrics(&self) -> String {
        let c = &self.counters;
        let mut out = String::new();
        let mut line = |key: &str, value: &dyn std::fmt::Display| {
            let _ = writeln!(out, "pulsecast_{key} {value}");
        };

        line("connections", &self.connections.total_connections);
        line("unique_users", &self.connections.unique_users);
        line("uptime_seconds", &self.uptime_secs);
        line("memory_bytes", &self.process.memory_bytes);
        line("virtual_memory_bytes", &self.process.virtual_memory_bytes);
        line("cpu_percent", &self.process.cpu_percent);
        line("connections_opened_total", &c.connections_opened);
        line("connections_closed_total", &c.connections_closed);
        line("messages_received_total", &c.messages_received);
        line("messages_sent_total", &c.messages_sent);
        line("errors_total", &c.errors);
        line("malformed_messages_total", &c.malformed_messages);
        line("auth_failures_total", &c.auth_failures);
        line("heartbeat_evictions_total", &c.heartbeat_evictions);
        line("insights_delivered_total", &c.insights_delivered);
        line("messages_per_second", &c.messages_per_second);
        for (topic, count) in &self.connections.subscriptions_by_topic {
            line(&format!("subscriptions_{topic}"), count);
        }

        out
    }
}

/// State behind the health routes.
#[derive(Debug, Clone)]
pub struct HealthState {
    hub: HubHandle,
    metrics: Arc<WsMetrics>,
    sampler: Arc<ResourceSampler>,
    started: Instant,
}

impl HealthState {
    /// Creates the health state for a worker.
    #[must_use]
    pub fn new(hub: HubHandle, metrics: Arc<WsMetrics>) -> Self {
        Self {
            hub,
            metrics,
            sampler: Arc::new(ResourceSampler::new()),
            started: Instant::now(),
        }
    }

    /// Takes a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub has stopped.
    pub async fn snapshot(&self) -> Result<HealthSnapshot, HubError> {
        let connections = self.hub.stats().await?;
        Ok(HealthSnapshot {
            status: "healthy".to_string(),
            timestamp: Utc::now(),
            pid: std::process::id(),
            uptime_secs: self.started.elapsed().as_secs(),
            connections,
            process: self.sampler.sample().await,
            counters: self.metrics.snapshot(),
        })
    }
}

/// `GET /health`
pub async fn health_handler(State(state): State<HealthState>) -> Response {
    match state.snapshot().await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => unavailable(&e),
    }
}

/// `GET /metrics`
pub async fn metrics_handler(State(state): State<HealthState>) -> Response {
    match state.snapshot().await {
        Ok(snapshot) => (
            [(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)],
            snapshot.render_metrics(),
        )
            .into_response(),
        Err(e) => unavailable(&e),
    }
}

fn unavailable(error: &HubError) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(serde_json::json!({ "status": "unavailable", "error": error.to_string() })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use axum::routing::get;
    use axum::Router;
    use axum_test::TestServer;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::ws::Hub;

    fn health_state() -> (HealthState, HubHandle, CancellationToken) {
        let cancel = CancellationToken::new();
        let metrics = Arc::new(WsMetrics::new());
        let (hub, handle) = Hub::new(Duration::from_secs(30), Arc::clone(&metrics), cancel.clone());
        hub.spawn();
        (HealthState::new(handle.clone(), metrics), handle, cancel)
    }

    fn app(state: HealthState) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
    }

    fn sample_snapshot() -> HealthSnapshot {
        HealthSnapshot {
            status: "healthy".to_string(),
            timestamp: Utc::now(),
            pid: 42,
            uptime_secs: 7,
            connections: RegistryStats {
                total_connections: 3,
                unique_users: 2,
                subscriptions_by_topic: BTreeMap::from([("trend_update".to_string(), 2)]),
            },
            process: ProcessUsage {
                memory_bytes: 1024,
                virtual_memory_bytes: 4096,
                cpu_percent: 1.5,
            },
            counters: WsMetrics::new().snapshot(),
        }
    }

    #[test]
    fn test_render_metrics() {
        let text = sample_snapshot().render_metrics();
        let lines: Vec<&str> = text.lines().collect();

        assert!(lines.contains(&"pulsecast_connections 3"));
        assert!(lines.contains(&"pulsecast_unique_users 2"));
        assert!(lines.contains(&"pulsecast_uptime_seconds 7"));
        assert!(lines.contains(&"pulsecast_memory_bytes 1024"));
        assert!(lines.contains(&"pulsecast_subscriptions_trend_update 2"));
        assert!(lines.iter().any(|l| l.starts_with("pulsecast_messages_per_second ")));
        for line in lines {
            let mut parts = line.split(' ');
            assert!(parts.next().is_some_and(|k| k.starts_with("pulsecast_")));
            assert!(parts.next().is_some_and(|v| v.parse::<f64>().is_ok()));
            assert!(parts.next().is_none());
        }
    }

    #[tokio::test]
    async fn test_sampler_reports_memory() {
        let sampler = ResourceSampler::new();
        let usage = sampler.sample().await;
        assert!(usage.memory_bytes > 0);
    }

    #[tokio::test]
    async fn test_health_route() {
        let (state, hub, _cancel) = health_state();
        let (tx, _rx) = mpsc::channel(8);
        hub.register("alice", tx).await.expect("register");
        let server = TestServer::new(app(state)).expect("server");

        let response = server.get("/health").await;

        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["connections"]["totalConnections"], 1);
        assert_eq!(body["connections"]["uniqueUsers"], 1);
        assert_eq!(body["pid"], std::process::id());
        assert!(body["process"]["memoryBytes"].is_u64());
        assert!(body["uptimeSecs"].is_u64());
    }

    #[tokio::test]
    async fn test_metrics_route() {
        let (state, _hub, _cancel) = health_state();
        let server = TestServer::new(app(state)).expect("server");

        let response = server.get("/metrics").await;

        response.assert_status_ok();
        assert_eq!(
            response.header("content-type").to_str().expect("header"),
            METRICS_CONTENT_TYPE
        );
        assert!(response.text().lines().any(|l| l == "pulsecast_connections 0"));
    }

    #[tokio::test]
    async fn test_health_unavailable_after_hub_stops() {
        let (state, hub, cancel) = health_state();
        cancel.cancel();
        while !hub.is_closed() {
            tokio::task::yield_now().await;
        }
        let server = TestServer::new(app(state)).expect("server");

        let response = server.get("/health").await;

        assert_eq!(response.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
