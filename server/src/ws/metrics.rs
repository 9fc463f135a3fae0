//! Connection metrics.
//!
//! Atomic counters shared by the hub, the upgrade handler and the health
//! routes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Counters for one worker.
#[derive(Debug)]
pub struct WsMetrics {
    /// Total connections registered.
    connections_opened: AtomicU64,

    /// Total connections removed from the registry.
    connections_closed: AtomicU64,

    /// Frames received from clients.
    messages_received: AtomicU64,

    /// Frames queued to clients.
    messages_sent: AtomicU64,

    /// Transport errors.
    errors: AtomicU64,

    /// Frames that could not be decoded.
    malformed_messages: AtomicU64,

    /// Rejected upgrade requests.
    auth_failures: AtomicU64,

    /// Connections evicted by the heartbeat.
    heartbeat_evictions: AtomicU64,

    /// Topics added to subscription sets.
    subscriptions: AtomicU64,

    /// Topics removed from subscription sets.
    unsubscriptions: AtomicU64,

    /// Insight events delivered to at least one connection.
    insights_delivered: AtomicU64,

    /// Start time for rate calculation.
    start_time: Instant,
}

impl Default for WsMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl WsMetrics {
    /// Creates a new metrics instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections_opened: AtomicU64::new(0),
            connections_closed: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            malformed_messages: AtomicU64::new(0),
            auth_failures: AtomicU64::new(0),
            heartbeat_evictions: AtomicU64::new(0),
            subscriptions: AtomicU64::new(0),
            unsubscriptions: AtomicU64::new(0),
            insights_delivered: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Records a connection opened.
    pub fn record_connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a connection closed.
    pub fn record_connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a message received.
    pub fn record_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a message sent.
    pub fn record_message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a transport error.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a malformed client frame.
    pub fn record_malformed(&self) {
        self.malformed_messages.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a rejected upgrade.
    pub fn record_auth_failure(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a heartbeat eviction.
    pub fn record_heartbeat_eviction(&self) {
        self.heartbeat_evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a subscription.
    pub fn record_subscription(&self) {
        self.subscriptions.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an unsubscription.
    pub fn record_unsubscription(&self) {
        self.unsubscriptions.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an insight event that reached at least one connection.
    pub fn record_insight_delivered(&self) {
        self.insights_delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the total connections opened.
    #[must_use]
    pub fn connections_opened(&self) -> u64 {
        self.connections_opened.load(Ordering::Relaxed)
    }

    /// Returns the total connections closed.
    #[must_use]
    pub fn connections_closed(&self) -> u64 {
        self.connections_closed.load(Ordering::Relaxed)
    }

    /// Returns the current active connections.
    #[must_use]
    pub fn active_connections(&self) -> u64 {
        self.connections_opened()
            .saturating_sub(self.connections_closed())
    }

    /// Returns the total messages received.
    #[must_use]
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Returns the total messages sent.
    #[must_use]
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    /// Returns the total errors.
    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Returns the malformed frame count.
    #[must_use]
    pub fn malformed_messages(&self) -> u64 {
        self.malformed_messages.load(Ordering::Relaxed)
    }

    /// Returns the rejected upgrade count.
    #[must_use]
    pub fn auth_failures(&self) -> u64 {
        self.auth_failures.load(Ordering::Relaxed)
    }

    /// Returns the heartbeat eviction count.
    #[must_use]
    pub fn heartbeat_evictions(&self) -> u64 {
        self.heartbeat_evictions.load(Ordering::Relaxed)
    }

    /// Returns the total subscriptions.
    #[must_use]
    pub fn subscriptions(&self) -> u64 {
        self.subscriptions.load(Ordering::Relaxed)
    }

    /// Returns the total unsubscriptions.
    #[must_use]
    pub fn unsubscriptions(&self) -> u64 {
        self.unsubscriptions.load(Ordering::Relaxed)
    }

    /// Returns the delivered insight count.
    #[must_use]
    pub fn insights_delivered(&self) -> u64 {
        self.insights_delivered.load(Ordering::Relaxed)
    }

    /// Returns the uptime.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Returns messages per second (received + sent).
    #[must_use]
    pub fn messages_per_second(&self) -> f64 {
        let elapsed = self.uptime().as_secs_f64();
        if elapsed > 0.0 {
            (self.messages_received() + self.messages_sent()) as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Returns a snapshot of all metrics.
    #[must_use]
    pub fn snapshot(&self) -> WsMetricsSnapshot {
        WsMetricsSnapshot {
            connections_opened: self.connections_opened(),
            connections_closed: self.connections_closed(),
            active_connections: self.active_connections(),
            messages_received: self.messages_received(),
            messages_sent: self.messages_sent(),
            errors: self.errors(),
            malformed_messages: self.malformed_messages(),
            auth_failures: self.auth_failures(),
            heartbeat_evictions: self.heartbeat_evictions(),
            subscriptions: self.subscriptions(),
            unsubscriptions: self.unsubscriptions(),
            insights_delivered: self.insights_delivered(),
            uptime_secs: self.uptime().as_secs(),
            messages_per_second: self.messages_per_second(),
        }
    }
}

/// A point-in-time snapshot of connection metrics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WsMetricsSnapshot {
    /// Total connections opened.
    pub connections_opened: u64,
    /// Total connections closed.
    pub connections_closed: u64,
    /// Active connections.
    pub active_connections: u64,
    /// Messages received.
    pub messages_received: u64,
    /// Messages sent.
    pub messages_sent: u64,
    /// Transport errors.
    pub errors: u64,
    /// Malformed frames.
    pub malformed_messages: u64,
    /// Rejected upgrades.
    pub auth_failures: u64,
    /// Heartbeat evictions.
    pub heartbeat_evictions: u64,
    /// Subscriptions.
    pub subscriptions: u64,
    /// Unsubscriptions.
    pub unsubscriptions: u64,
    /// Delivered insights.
    pub insights_delivered: u64,
    /// Uptime in seconds.
    pub uptime_secs: u64,
    /// Messages per second.
    pub messages_per_second: f64,
}
