//! Connection records.
//!
//! A record is owned by the registry of the worker that accepted it and is
//! addressed by an opaque [`ConnectionId`].

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use pulsecast_sdk::{ConnectionStatus, InsightEvent, Priority, Topic};
use tokio::sync::mpsc;

/// Opaque connection handle, unique within one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wraps a raw handle.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw handle.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a frame could not be handed to a connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// No such connection in the registry.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    /// The connection's writer is gone.
    #[error("connection {0} closed")]
    Closed(ConnectionId),

    /// The connection's outbound queue is full.
    #[error("connection {0} is not draining its queue")]
    Backpressure(ConnectionId),

    /// The message could not be encoded.
    #[error("failed to encode message: {0}")]
    Encode(String),
}

/// State of one registered connection.
#[derive(Debug)]
pub struct ConnectionRecord {
    /// Registry handle.
    pub id: ConnectionId,

    /// Client-visible identifier, unique across workers.
    pub client_id: String,

    /// Authenticated user.
    pub user_id: String,

    /// Subscribed topics.
    pub subscriptions: BTreeSet<Topic>,

    /// Cleared by each heartbeat probe, set again by an acknowledgment.
    pub alive: bool,

    /// Time of the last probe.
    pub last_probe_at: Option<DateTime<Utc>>,

    sender: mpsc::Sender<Arc<str>>,
}

impl ConnectionRecord {
    /// Creates a record with an empty subscription set.
    #[must_use]
    pub fn new(id: ConnectionId, user_id: impl Into<String>, sender: mpsc::Sender<Arc<str>>) -> Self {
        Self {
            id,
            client_id: format!("{}-{}", std::process::id(), id),
            user_id: user_id.into(),
            subscriptions: BTreeSet::new(),
            alive: true,
            last_probe_at: None,
            sender,
        }
    }

    /// Returns true if subscribed to `topic`.
    #[must_use]
    pub fn is_subscribed(&self, topic: Topic) -> bool {
        self.subscriptions.contains(&topic)
    }

    /// Returns the subscription set in wire order.
    #[must_use]
    pub fn topics(&self) -> Vec<Topic> {
        self.subscriptions.iter().copied().collect()
    }

    /// Returns true if `event` should be delivered to this connection.
    ///
    /// Low priority events are withheld from connections that also hold
    /// `high_priority_only`.
    #[must_use]
    pub fn accepts(&self, event: &InsightEvent) -> bool {
        if !self.is_subscribed(event.topic) {
            return false;
        }
        !(event.priority == Priority::Low && self.is_subscribed(Topic::HighPriorityOnly))
    }

    /// Builds the `get_status` payload.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            client_id: self.client_id.clone(),
            user_id: self.user_id.clone(),
            subscriptions: self.topics(),
            is_connected: true,
            timestamp: Utc::now(),
        }
    }

    /// Queues an encoded frame without waiting.
    ///
    /// # Errors
    ///
    /// Returns an error if the writer is gone or the queue is full.
    pub fn try_send(&self, frame: Arc<str>) -> Result<(), DeliveryError> {
        self.sender.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Backpressure(self.id),
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed(self.id),
        })
    }
}
