//! Pulsecast Cluster - process supervisor for a pool of workers.
//!
//! The supervisor forks one worker process per slot, replaces workers that
//! exit unexpectedly, and on `SIGTERM` stops every worker before exiting.
//! Workers share the listening port through `SO_REUSEPORT` and report back
//! to the supervisor as JSON lines on stdout.
//!
//! # Components
//!
//! - [`config`]: Pool configuration
//! - [`supervisor`]: Worker lifecycle and self-healing
//! - [`worker`]: Worker process bootstrap
//! - [`report`]: Worker to supervisor reports
//! - [`signal`]: Signal delivery and shutdown signal handling
//! - [`metrics`]: Supervisor metrics

pub mod config;
pub mod metrics;
pub mod report;
pub mod signal;
pub mod supervisor;
pub mod worker;

pub use config::ClusterConfig;
pub use metrics::SupervisorMetrics;
pub use report::{ClusterStats, WorkerReport};
pub use supervisor::{
    CommandSpawner, ShutdownReport, Supervisor, SupervisorError, WorkerHandle, WorkerSpawner,
    WorkerState,
};
pub use worker::run_worker;
