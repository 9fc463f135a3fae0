//! Supervisor metrics.
//!
//! Provides atomic counters for monitoring the worker pool.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Metrics for the process supervisor.
#[derive(Debug)]
pub struct SupervisorMetrics {
    /// Workers forked successfully.
    spawns: AtomicU64,

    /// Forks that failed.
    spawn_failures: AtomicU64,

    /// Workers that exited while the pool was running.
    crashes: AtomicU64,

    /// Replacements forked after a crash.
    restarts: AtomicU64,

    /// Workers killed after the shutdown timeout.
    forced_kills: AtomicU64,

    /// Start time for uptime.
    start_time: Instant,
}

impl Default for SupervisorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SupervisorMetrics {
    /// Creates a new metrics instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            spawns: AtomicU64::new(0),
            spawn_failures: AtomicU64::new(0),
            crashes: AtomicU64::new(0),
            restarts: AtomicU64::new(0),
            forced_kills: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Records a successful fork.
    pub fn record_spawn(&self) {
        self.spawns.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed fork.
    pub fn record_spawn_failure(&self) {
        self.spawn_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an unexpected worker exit.
    pub fn record_crash(&self) {
        self.crashes.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a replacement fork.
    pub fn record_restart(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a forced kill.
    pub fn record_forced_kill(&self) {
        self.forced_kills.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns successful forks.
    #[must_use]
    pub fn spawns(&self) -> u64 {
        self.spawns.load(Ordering::Relaxed)
    }

    /// Returns failed forks.
    #[must_use]
    pub fn spawn_failures(&self) -> u64 {
        self.spawn_failures.load(Ordering::Relaxed)
    }

    /// Returns unexpected exits.
    #[must_use]
    pub fn crashes(&self) -> u64 {
        self.crashes.load(Ordering::Relaxed)
    }

    /// Returns replacement forks.
    #[must_use]
    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }

    /// Returns forced kills.
    #[must_use]
    pub fn forced_kills(&self) -> u64 {
        self.forced_kills.load(Ordering::Relaxed)
    }

    /// Returns the uptime.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Returns a snapshot of all metrics.
    #[must_use]
    pub fn snapshot(&self) -> SupervisorMetricsSnapshot {
        SupervisorMetricsSnapshot {
            spawns: self.spawns(),
            spawn_failures: self.spawn_failures(),
            crashes: self.crashes(),
            restarts: self.restarts(),
            forced_kills: self.forced_kills(),
            uptime: self.uptime(),
        }
    }
}

/// A point-in-time snapshot of supervisor metrics.
#[derive(Debug, Clone)]
pub struct SupervisorMetricsSnapshot {
    /// Successful forks.
    pub spawns: u64,
    /// Failed forks.
    pub spawn_failures: u64,
    /// Unexpected exits.
    pub crashes: u64,
    /// Replacement forks.
    pub restarts: u64,
    /// Forced kills.
    pub forced_kills: u64,
    /// Uptime.
    pub uptime: Duration,
}
