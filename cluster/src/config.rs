//! Supervisor configuration.

use std::num::NonZeroUsize;
use std::time::Duration;

use pulsecast_server::config::{env_flag, env_value};
use pulsecast_server::ConfigError;
use serde::{Deserialize, Serialize};

/// Variable naming a worker's slot; set only in worker processes.
pub const WORKER_ID_VAR: &str = "PULSECAST_WORKER_ID";

/// Configuration for the process supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Run a supervised pool instead of a single in-process worker.
    pub enabled: bool,

    /// Target worker count.
    pub workers: usize,

    /// How long shutdown waits for workers before killing them.
    pub shutdown_timeout_ms: u64,

    /// Delay before retrying a failed spawn or a worker that died young.
    pub restart_delay_ms: u64,

    /// Workers that exit sooner than this are restarted after the delay.
    pub min_uptime_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            workers: default_workers(),
            shutdown_timeout_ms: 10_000,
            restart_delay_ms: 1_000,
            min_uptime_ms: 2_000,
        }
    }
}

impl ClusterConfig {
    /// Creates an enabled configuration with `workers` workers.
    #[must_use]
    pub fn with_workers(workers: usize) -> Self {
        Self {
            enabled: true,
            workers,
            ..Default::default()
        }
    }

    /// Sets the shutdown timeout.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, ms: u64) -> Self {
        self.shutdown_timeout_ms = ms;
        self
    }

    /// Sets the spawn retry delay.
    #[must_use]
    pub fn with_restart_delay(mut self, ms: u64) -> Self {
        self.restart_delay_ms = ms;
        self
    }

    /// Sets the minimum uptime for an immediate restart.
    #[must_use]
    pub fn with_min_uptime(mut self, ms: u64) -> Self {
        self.min_uptime_ms = ms;
        self
    }

    /// Returns the shutdown timeout.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Returns the spawn retry delay.
    #[must_use]
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    /// Returns the minimum uptime for an immediate restart.
    #[must_use]
    pub fn min_uptime(&self) -> Duration {
        Duration::from_millis(self.min_uptime_ms)
    }

    /// Reads the configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or validation fails.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or validation fails.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            enabled: env_flag(&lookup, "PULSECAST_CLUSTER_ENABLED", defaults.enabled)?,
            workers: env_value(&lookup, "PULSECAST_WORKERS", defaults.workers)?,
            shutdown_timeout_ms: env_value(
                &lookup,
                "PULSECAST_SHUTDOWN_TIMEOUT_MS",
                defaults.shutdown_timeout_ms,
            )?,
            restart_delay_ms: env_value(
                &lookup,
                "PULSECAST_RESTART_DELAY_MS",
                defaults.restart_delay_ms,
            )?,
            min_uptime_ms: env_value(&lookup, "PULSECAST_MIN_UPTIME_MS", defaults.min_uptime_ms)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker count or shutdown timeout is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::InvalidWorkerCount);
        }

        if self.shutdown_timeout_ms == 0 {
            return Err(ConfigError::InvalidShutdownTimeout);
        }

        Ok(())
    }
}

/// Reads the worker slot of the current process, if it is a worker.
///
/// # Errors
///
/// Returns an error if the variable is set but is not a slot number.
pub fn worker_slot_from_env() -> Result<Option<usize>, ConfigError> {
    worker_slot(|key| std::env::var(key).ok())
}

fn worker_slot<F>(lookup: F) -> Result<Option<usize>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(WORKER_ID_VAR) {
        Some(_) => env_value(&lookup, WORKER_ID_VAR, 0).map(Some),
        None => Ok(None),
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
}
