//! Hub reactor.
//!
//! One task per worker owns the [`Registry`], the [`MessageRouter`] and the
//! [`HeartbeatMonitor`]. Connection tasks and producers talk to it through a
//! [`HubHandle`]; commands are applied one at a time in arrival order, with
//! the heartbeat tick and the shutdown token multiplexed into the same loop.

use std::sync::Arc;
use std::time::Duration;

use pulsecast_sdk::{ClientMessage, InsightEvent, RegistryStats, ServerMessage};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection::ConnectionId;
use super::heartbeat::HeartbeatMonitor;
use super::metrics::WsMetrics;
use super::registry::Registry;
use super::router::MessageRouter;

/// Capacity of the hub command queue.
const COMMAND_BUFFER: usize = 1024;

/// Commands applied by the hub task.
#[derive(Debug)]
pub enum HubCommand {
    /// Register an authenticated connection.
    Register {
        /// Authenticated user.
        user_id: String,
        /// Outbound queue of the connection's writer.
        sender: mpsc::Sender<Arc<str>>,
        /// Receives the assigned handle.
        reply: oneshot::Sender<ConnectionId>,
    },

    /// A decoded frame from a connection.
    Inbound {
        /// Source connection.
        id: ConnectionId,
        /// The frame.
        message: ClientMessage,
    },

    /// A transport-level liveness acknowledgment.
    Acknowledge {
        /// Source connection.
        id: ConnectionId,
    },

    /// The connection's socket closed.
    Disconnect {
        /// Closed connection.
        id: ConnectionId,
    },

    /// Route an insight event.
    Insight {
        /// The event.
        event: InsightEvent,
        /// Receives the number of connections reached.
        reply: oneshot::Sender<usize>,
    },

    /// Send a message to every connection of one user.
    ToUser {
        /// Target user.
        user_id: String,
        /// The message.
        message: Value,
        /// Receives the number of connections reached.
        reply: oneshot::Sender<usize>,
    },

    /// Send a message to every connection.
    Broadcast {
        /// The message.
        message: Value,
        /// Receives the number of connections reached.
        reply: oneshot::Sender<usize>,
    },

    /// Read registry statistics.
    Stats {
        /// Receives the statistics.
        reply: oneshot::Sender<RegistryStats>,
    },
}

/// Hub errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    /// The hub task has stopped.
    #[error("hub stopped")]
    Closed,

    /// A producer message could not be encoded.
    #[error("failed to encode message: {0}")]
    Encode(String),
}

/// Cloneable handle to a running hub.
///
/// This is the producer-facing interface of a worker.
#[derive(Debug, Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    async fn notify(&self, command: HubCommand) -> Result<(), HubError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| HubError::Closed)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> HubCommand,
    ) -> Result<T, HubError> {
        let (reply, response) = oneshot::channel();
        self.notify(build(reply)).await?;
        response.await.map_err(|_| HubError::Closed)
    }

    /// Registers a connection and returns its handle.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub has stopped.
    pub async fn register(
        &self,
        user_id: impl Into<String>,
        sender: mpsc::Sender<Arc<str>>,
    ) -> Result<ConnectionId, HubError> {
        let user_id = user_id.into();
        self.request(|reply| HubCommand::Register {
            user_id,
            sender,
            reply,
        })
        .await
    }

    /// Forwards a decoded client frame.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub has stopped.
    pub async fn inbound(&self, id: ConnectionId, message: ClientMessage) -> Result<(), HubError> {
        self.notify(HubCommand::Inbound { id, message }).await
    }

    /// Records a transport-level liveness acknowledgment.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub has stopped.
    pub async fn acknowledge(&self, id: ConnectionId) -> Result<(), HubError> {
        self.notify(HubCommand::Acknowledge { id }).await
    }

    /// Removes a connection whose socket closed.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub has stopped.
    pub async fn disconnect(&self, id: ConnectionId) -> Result<(), HubError> {
        self.notify(HubCommand::Disconnect { id }).await
    }

    /// Delivers an insight event to its user's matching connections.
    ///
    /// Returns the number of connections reached.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub has stopped.
    pub async fn send_insight_update(&self, event: InsightEvent) -> Result<usize, HubError> {
        self.request(|reply| HubCommand::Insight { event, reply }).await
    }

    /// Sends `message` to every connection of `user_id`, regardless of
    /// subscriptions.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be encoded or the hub has
    /// stopped.
    pub async fn send_to_user<M: Serialize + ?Sized>(
        &self,
        user_id: impl Into<String>,
        message: &M,
    ) -> Result<usize, HubError> {
        let message = to_value(message)?;
        let user_id = user_id.into();
        self.request(|reply| HubCommand::ToUser {
            user_id,
            message,
            reply,
        })
        .await
    }

    /// Sends `message` to every connection of this worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be encoded or the hub has
    /// stopped.
    pub async fn broadcast<M: Serialize + ?Sized>(&self, message: &M) -> Result<usize, HubError> {
        let message = to_value(message)?;
        self.request(|reply| HubCommand::Broadcast { message, reply })
            .await
    }

    /// Returns registry statistics.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub has stopped.
    pub async fn stats(&self) -> Result<RegistryStats, HubError> {
        self.request(|reply| HubCommand::Stats { reply }).await
    }

    /// Returns true once the hub task has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

fn to_value<M: Serialize + ?Sized>(message: &M) -> Result<Value, HubError> {
    serde_json::to_value(message).map_err(|e| HubError::Encode(e.to_string()))
}

/// The hub task state.
#[derive(Debug)]
pub struct Hub {
    registry: Registry,
    router: MessageRouter,
    heartbeat: HeartbeatMonitor,
    commands: mpsc::Receiver<HubCommand>,
    cancel: CancellationToken,
}

impl Hub {
    /// Creates a hub and its handle.
    ///
    /// The hub stops when `cancel` fires, closing every connection.
    #[must_use]
    pub fn new(
        heartbeat_interval: Duration,
        metrics: Arc<WsMetrics>,
        cancel: CancellationToken,
    ) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let hub = Self {
            registry: Registry::new(Arc::clone(&metrics)),
            router: MessageRouter::new(Arc::clone(&metrics)),
            heartbeat: HeartbeatMonitor::new(heartbeat_interval, metrics),
            commands: rx,
            cancel,
        };
        (hub, HubHandle { commands: tx })
    }

    /// Spawns the hub onto the runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Runs until cancelled or every handle is dropped.
    pub async fn run(mut self) {
        let period = self.heartbeat.interval();
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(heartbeat = ?period, "hub started");

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    debug!("hub cancelled");
                    break;
                }
                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.handle(command),
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    let outcome = self.heartbeat.sweep(&mut self.registry);
                    if outcome.evicted > 0 {
                        info!(evicted = outcome.evicted, probed = outcome.probed, "heartbeat sweep");
                    }
                }
            }
        }

        self.commands.close();
        let closed = self.registry.close_all();
        info!(closed, "hub stopped");
    }

    fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register {
                user_id,
                sender,
                reply,
            } => {
                let id = self.registry.register(user_id, sender);
                let hello = self.registry.get(id).map(|record| {
                    ServerMessage::connection_established(
                        record.client_id.clone(),
                        record.user_id.clone(),
                    )
                });
                if let Some(hello) = hello {
                    if let Err(e) = self.registry.send_one(id, &hello) {
                        warn!(conn_id = %id, error = %e, "failed to greet connection");
                    }
                }
                if reply.send(id).is_err() {
                    self.registry.unregister(id);
                }
            }
            HubCommand::Inbound { id, message } => {
                if let Err(e) = self
                    .router
                    .handle_client_message(&mut self.registry, id, message)
                {
                    debug!(conn_id = %id, error = %e, "client message dropped");
                }
            }
            HubCommand::Acknowledge { id } => {
                self.heartbeat.acknowledge(&mut self.registry, id);
            }
            HubCommand::Disconnect { id } => {
                if let Some(record) = self.registry.unregister(id) {
                    info!(conn_id = %id, user_id = %record.user_id, "connection closed");
                }
            }
            HubCommand::Insight { event, reply } => {
                let delivered = self
                    .router
                    .route_insight(&mut self.registry, event)
                    .unwrap_or_else(|e| {
                        warn!(error = %e, "failed to route insight");
                        0
                    });
                let _ = reply.send(delivered);
            }
            HubCommand::ToUser {
                user_id,
                message,
                reply,
            } => {
                let delivered = self
                    .registry
                    .send_to_user(&user_id, &message)
                    .unwrap_or_else(|e| {
                        warn!(%user_id, error = %e, "failed to send to user");
                        0
                    });
                let _ = reply.send(delivered);
            }
            HubCommand::Broadcast { message, reply } => {
                let delivered = self.registry.broadcast(&message).unwrap_or_else(|e| {
                    warn!(error = %e, "failed to broadcast");
                    0
                });
                let _ = reply.send(delivered);
            }
            HubCommand::Stats { reply } => {
                let _ = reply.send(self.registry.stats());
            }
        }
    }
}
