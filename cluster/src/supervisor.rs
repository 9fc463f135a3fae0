//! Process supervisor.
//!
//! Keeps a pool of worker processes at its target size. A worker that exits
//! while the pool is running is replaced in the same slot, immediately if it
//! had been up for the minimum uptime and after the restart delay otherwise.
//! Once the shutdown token fires no worker is replaced: every worker gets
//! `SIGTERM`, and any worker still alive after the shutdown timeout gets
//! `SIGKILL`.

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pulsecast_server::ConfigError;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, Interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ClusterConfig, WORKER_ID_VAR};
use crate::metrics::SupervisorMetrics;
use crate::report::{ClusterStats, WorkerReport, WorkerStats};
use crate::signal::{self, Signal};

const EVENT_BUFFER: usize = 256;

/// Starts worker processes.
pub trait WorkerSpawner: Send + Sync + 'static {
    /// Starts the worker for `slot`.
    ///
    /// The supervisor reads reports from the child's stdout if it is piped.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be started.
    fn spawn(&self, slot: usize) -> io::Result<Child>;
}

/// Spawns workers by running a command with the slot in the environment.
#[derive(Debug, Clone)]
pub struct CommandSpawner {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
}

impl CommandSpawner {
    /// Creates a spawner running `program`.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// Creates a spawner re-running the current executable.
    ///
    /// # Errors
    ///
    /// Returns an error if the executable path cannot be resolved.
    pub fn current_exe() -> Result<Self, SupervisorError> {
        std::env::current_exe()
            .map(Self::new)
            .map_err(SupervisorError::Executable)
    }

    /// Appends an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Sets an environment variable for every worker.
    #[must_use]
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

impl WorkerSpawner for CommandSpawner {
    /// Workers get their own process group so terminal signals reach only
    /// the supervisor.
    fn spawn(&self, slot: usize) -> io::Result<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().cloned())
            .env(WORKER_ID_VAR, slot.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .process_group(0)
            .spawn()
    }
}

/// Lifecycle of one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Forked, not yet listening.
    Starting,
    /// Reported ready.
    Ready,
    /// Sent `SIGTERM`.
    ShuttingDown,
    /// Reaped.
    Exited,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::ShuttingDown => "shutting_down",
            Self::Exited => "exited",
        };
        f.write_str(name)
    }
}

/// A worker owned by the supervisor.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    slot: usize,
    pid: u32,
    state: WorkerState,
    started_at: DateTime<Utc>,
    spawned: Instant,
}

impl WorkerHandle {
    fn new(slot: usize, pid: u32) -> Self {
        Self {
            slot,
            pid,
            state: WorkerState::Starting,
            started_at: Utc::now(),
            spawned: Instant::now(),
        }
    }

    /// Pool slot.
    #[must_use]
    pub const fn slot(&self) -> usize {
        self.slot
    }

    /// Process id.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> WorkerState {
        self.state
    }

    /// Fork time.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

/// Outcome of a shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Workers that exited after `SIGTERM`.
    pub graceful: usize,
    /// Workers sent `SIGKILL`.
    pub forced: usize,
    /// Workers still not reaped when the supervisor gave up.
    pub abandoned: usize,
}

/// Supervisor errors.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The worker executable could not be resolved.
    #[error("failed to resolve worker executable: {0}")]
    Executable(#[source] io::Error),
}

#[derive(Debug)]
enum WorkerEvent {
    Report { slot: usize, report: WorkerReport },
    Exited {
        slot: usize,
        pid: u32,
        status: Option<ExitStatus>,
    },
    RetrySpawn { slot: usize },
}

/// Supervises a pool of worker processes.
#[derive(Debug)]
pub struct Supervisor<S> {
    config: ClusterConfig,
    spawner: S,
    workers: BTreeMap<usize, WorkerHandle>,
    stats: HashMap<usize, WorkerStats>,
    metrics: Arc<SupervisorMetrics>,
    stats_interval: Option<Duration>,
    shutting_down: bool,
    shutdown_signal: CancellationToken,
    events_tx: mpsc::Sender<WorkerEvent>,
    events_rx: mpsc::Receiver<WorkerEvent>,
}

impl<S: WorkerSpawner> Supervisor<S> {
    /// Creates a supervisor; no worker is started yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: ClusterConfig, spawner: S) -> Result<Self, SupervisorError> {
        config.validate()?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);

        Ok(Self {
            config,
            spawner,
            workers: BTreeMap::new(),
            stats: HashMap::new(),
            metrics: Arc::new(SupervisorMetrics::new()),
            stats_interval: None,
            shutting_down: false,
            shutdown_signal: CancellationToken::new(),
            events_tx,
            events_rx,
        })
    }

    /// Logs pool-wide stats every `every`.
    #[must_use]
    pub fn with_stats_interval(mut self, every: Duration) -> Self {
        self.stats_interval = Some(every);
        self
    }

    /// Returns the metrics.
    #[must_use]
    pub fn metrics(&self) -> &Arc<SupervisorMetrics> {
        &self.metrics
    }

    /// Returns the number of live workers.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Returns the live workers ordered by slot.
    pub fn workers(&self) -> impl Iterator<Item = &WorkerHandle> {
        self.workers.values()
    }

    /// Returns the worker in `slot`.
    #[must_use]
    pub fn worker(&self, slot: usize) -> Option<&WorkerHandle> {
        self.workers.get(&slot)
    }

    /// Returns true once shutdown has begun or its token has fired.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down || self.shutdown_signal.is_cancelled()
    }

    /// Aggregates the latest report of every worker.
    #[must_use]
    pub fn cluster_stats(&self) -> ClusterStats {
        ClusterStats::aggregate(self.workers.len(), self.stats.values())
    }

    /// Forks a worker into every empty slot.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&mut self) {
        for slot in 0..self.config.workers {
            if !self.workers.contains_key(&slot) {
                self.spawn_slot(slot);
            }
        }
    }

    /// Runs the pool until `shutdown` fires, then stops every worker.
    pub async fn run(mut self, shutdown: CancellationToken) -> ShutdownReport {
        info!(workers = self.config.workers, "starting worker pool");
        self.shutdown_signal = shutdown.clone();
        self.start();

        let mut ticker = self
            .stats_interval
            .map(|every| time::interval_at(Instant::now() + every, every));

        loop {
            tokio::select! {
                biased;

                () = shutdown.cancelled() => break,
                Some(event) = self.events_rx.recv() => {
                    self.handle_event(event);
                }
                () = tick(&mut ticker) => self.log_stats(),
            }
        }

        self.shutdown().await
    }

    /// Stops every worker.
    ///
    /// Sends `SIGTERM`, waits up to the shutdown timeout, then sends
    /// `SIGKILL` to the rest and reaps them.
    pub async fn shutdown(&mut self) -> ShutdownReport {
        self.shutting_down = true;
        info!(workers = self.workers.len(), "stopping worker pool");

        for handle in self.workers.values_mut() {
            handle.state = WorkerState::ShuttingDown;
            deliver(handle, Signal::Terminate);
        }

        let mut report = ShutdownReport {
            graceful: self.drain(self.config.shutdown_timeout()).await,
            ..ShutdownReport::default()
        };

        if !self.workers.is_empty() {
            for handle in self.workers.values() {
                warn!(slot = handle.slot, pid = handle.pid, "worker ignored SIGTERM, killing");
                if deliver(handle, Signal::Kill) {
                    self.metrics.record_forced_kill();
                    report.forced += 1;
                }
            }
            self.drain(self.config.shutdown_timeout()).await;
            report.abandoned = self.workers.len();
            if report.abandoned > 0 {
                error!(remaining = report.abandoned, "workers did not exit");
            }
        }

        info!(
            graceful = report.graceful,
            forced = report.forced,
            "worker pool stopped"
        );
        report
    }

    /// Handles events until every worker exited or `timeout` passed.
    ///
    /// Returns the number of workers that exited.
    async fn drain(&mut self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut exited = 0;

        while !self.workers.is_empty() {
            match time::timeout_at(deadline, self.events_rx.recv()).await {
                Ok(Some(event)) => {
                    if self.handle_event(event).is_some() {
                        exited += 1;
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }
        exited
    }

    /// Applies one event; returns the handle of a worker that exited.
    fn handle_event(&mut self, event: WorkerEvent) -> Option<WorkerHandle> {
        match event {
            WorkerEvent::Report { slot, report } => {
                self.on_report(slot, report);
                None
            }
            WorkerEvent::Exited { slot, pid, status } => self.on_exit(slot, pid, status),
            WorkerEvent::RetrySpawn { slot } => {
                if !self.is_shutting_down()
                    && slot < self.config.workers
                    && !self.workers.contains_key(&slot)
                {
                    self.spawn_slot(slot);
                }
                None
            }
        }
    }

    fn on_report(&mut self, slot: usize, report: WorkerReport) {
        let Some(handle) = self.workers.get_mut(&slot) else {
            return;
        };
        if handle.pid != report.pid() {
            debug!(slot, pid = report.pid(), "ignoring report from replaced worker");
            return;
        }

        match report {
            WorkerReport::Ready { pid } => {
                if handle.state == WorkerState::Starting {
                    handle.state = WorkerState::Ready;
                }
                info!(slot, pid, "worker ready");
            }
            WorkerReport::Stats {
                stats,
                memory_bytes,
                ..
            } => {
                self.stats.insert(
                    slot,
                    WorkerStats {
                        stats,
                        memory_bytes,
                        received_at: Utc::now(),
                    },
                );
            }
        }
    }

    fn on_exit(&mut self, slot: usize, pid: u32, status: Option<ExitStatus>) -> Option<WorkerHandle> {
        if self.workers.get(&slot).map(WorkerHandle::pid) != Some(pid) {
            return None;
        }
        let mut handle = self.workers.remove(&slot)?;
        handle.state = WorkerState::Exited;
        self.stats.remove(&slot);

        if self.is_shutting_down() {
            info!(slot, pid, status = ?status, "worker exited");
            return Some(handle);
        }

        self.metrics.record_crash();
        let uptime = handle.spawned.elapsed();
        if uptime < self.config.min_uptime() {
            warn!(
                slot,
                pid,
                status = ?status,
                ?uptime,
                delay = ?self.config.restart_delay(),
                "worker exited during startup, restarting after delay"
            );
            self.schedule_retry(slot);
            return Some(handle);
        }

        warn!(slot, pid, status = ?status, "worker exited unexpectedly, restarting");
        if self.spawn_slot(slot) {
            self.metrics.record_restart();
        }
        Some(handle)
    }

    /// Forks the worker for `slot`; a failure schedules a retry.
    fn spawn_slot(&mut self, slot: usize) -> bool {
        let mut child = match self.spawner.spawn(slot) {
            Ok(child) => child,
            Err(e) => {
                self.metrics.record_spawn_failure();
                error!(slot, error = %e, "failed to start worker");
                self.schedule_retry(slot);
                return false;
            }
        };

        let Some(pid) = child.id() else {
            self.metrics.record_spawn_failure();
            error!(slot, "worker exited before it could be tracked");
            self.schedule_retry(slot);
            return false;
        };

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(read_reports(slot, pid, stdout, self.events_tx.clone()));
        }
        tokio::spawn(wait_exit(slot, pid, child, self.events_tx.clone()));

        self.metrics.record_spawn();
        self.workers.insert(slot, WorkerHandle::new(slot, pid));
        info!(slot, pid, "worker started");
        true
    }

    fn schedule_retry(&self, slot: usize) {
        let events = self.events_tx.clone();
        let delay = self.config.restart_delay();
        tokio::spawn(async move {
            time::sleep(delay).await;
            let _ = events.send(WorkerEvent::RetrySpawn { slot }).await;
        });
    }

    fn log_stats(&self) {
        let stats = self.cluster_stats();
        info!(
            workers = stats.workers,
            reporting = stats.reporting,
            connections = stats.connections.total_connections,
            users = stats.connections.unique_users,
            memory_bytes = stats.memory_bytes,
            restarts = self.metrics.restarts(),
            "cluster stats"
        );
    }
}

/// Sends `signal`; returns false if the worker was already gone.
fn deliver(handle: &WorkerHandle, signal: Signal) -> bool {
    match signal::send(handle.pid, signal) {
        Ok(()) => true,
        Err(e) if signal::is_gone(&e) => false,
        Err(e) => {
            error!(slot = handle.slot, pid = handle.pid, ?signal, error = %e, "failed to signal worker");
            false
        }
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn read_reports(
    slot: usize,
    pid: u32,
    stdout: ChildStdout,
    events: mpsc::Sender<WorkerEvent>,
) {
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match WorkerReport::parse(&line) {
            Some(report) => {
                if events.send(WorkerEvent::Report { slot, report }).await.is_err() {
                    break;
                }
            }
            None => debug!(slot, pid, %line, "ignoring worker output"),
        }
    }
}

async fn wait_exit(slot: usize, pid: u32, mut child: Child, events: mpsc::Sender<WorkerEvent>) {
    let status = match child.wait().await {
        Ok(status) => Some(status),
        Err(e) => {
            warn!(slot, pid, error = %e, "failed to reap worker");
            None
        }
    };
    let _ = events.send(WorkerEvent::Exited { slot, pid, status }).await;
}
