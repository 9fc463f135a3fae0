//! Liveness sweep.
//!
//! Each sweep evicts connections that did not acknowledge the previous probe
//! and probes the rest, so a silent peer is gone within two intervals.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pulsecast_sdk::ServerMessage;
use tracing::{error, info, trace};

use super::connection::ConnectionId;
use super::metrics::WsMetrics;
use super::registry::{encode, Registry};

/// Result of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Connections sent a probe.
    pub probed: usize,
    /// Connections evicted for missing the previous probe.
    pub evicted: usize,
}

/// Heartbeat monitor for one registry.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    interval: Duration,
    metrics: Arc<WsMetrics>,
}

impl HeartbeatMonitor {
    /// Creates a monitor sweeping every `interval`.
    #[must_use]
    pub fn new(interval: Duration, metrics: Arc<WsMetrics>) -> Self {
        Self { interval, metrics }
    }

    /// Returns the sweep interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs one sweep over every registered connection.
    pub fn sweep(&self, registry: &mut Registry) -> SweepOutcome {
        let now = Utc::now();
        let mut outcome = SweepOutcome::default();

        let probe = match encode(&ServerMessage::probe(now)) {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "failed to encode probe");
                return outcome;
            }
        };

        for id in registry.ids() {
            let Some(record) = registry.get_mut(id) else {
                continue;
            };

            if !record.alive {
                let user_id = record.user_id.clone();
                registry.unregister(id);
                self.metrics.record_heartbeat_eviction();
                outcome.evicted += 1;
                info!(conn_id = %id, %user_id, "evicting unresponsive connection");
                continue;
            }

            record.alive = false;
            record.last_probe_at = Some(now);
            if registry.send_text(id, Arc::clone(&probe)).is_ok() {
                outcome.probed += 1;
            }
        }

        trace!(probed = outcome.probed, evicted = outcome.evicted, "heartbeat sweep");
        outcome
    }

    /// Records a probe acknowledgment from `id`.
    pub fn acknowledge(&self, registry: &mut Registry, id: ConnectionId) -> bool {
        let known = registry.mark_alive(id);
        if known {
            trace!(conn_id = %id, "probe acknowledged");
        }
        known
    }
}
