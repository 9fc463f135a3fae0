//! WebSocket message types.
//!
//! Defines the message format for client-server communication.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::event::InsightEvent;
use super::topics::Topic;

/// Tags a client may send.
const CLIENT_TAGS: [&str; 5] = ["subscribe", "unsubscribe", "ping", "pong", "get_status"];

/// Message sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Add topics to the connection's subscription set.
    Subscribe {
        /// Requested topic names; names outside the whitelist are dropped.
        #[serde(default, deserialize_with = "string_entries")]
        topics: Vec<String>,
    },

    /// Remove topics from the connection's subscription set.
    Unsubscribe {
        /// Topic names to remove.
        #[serde(default, deserialize_with = "string_entries")]
        topics: Vec<String>,
    },

    /// Client-initiated round trip.
    Ping,

    /// Acknowledgment of a server liveness probe.
    Pong,

    /// Request the connection's current status.
    GetStatus,
}

impl ClientMessage {
    /// Decodes a text frame.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] describing why the frame was rejected.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;

        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?
            .to_string();

        if !CLIENT_TAGS.contains(&tag.as_str()) {
            return Err(ProtocolError::UnknownType(tag));
        }

        serde_json::from_value(value).map_err(|e| ProtocolError::InvalidBody {
            tag,
            reason: e.to_string(),
        })
    }

    /// Returns the wire tag of this message.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::GetStatus => "get_status",
        }
    }
}

/// Reads a topic list, skipping entries that are not strings.
fn string_entries<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries = Vec::<Value>::deserialize(deserializer)?;
    Ok(entries
        .into_iter()
        .filter_map(|entry| match entry {
            Value::String(name) => Some(name),
            _ => None,
        })
        .collect())
}

/// Reasons a client frame could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The frame is not valid JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// The frame has no string `type` field.
    #[error("missing message type")]
    MissingType,

    /// The `type` tag is not recognised.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// The tag is known but the body does not match it.
    #[error("invalid {tag} message: {reason}")]
    InvalidBody {
        /// Message tag.
        tag: String,
        /// Decoder error.
        reason: String,
    },

    /// The frame is not text.
    #[error("unsupported binary frame")]
    Binary,
}

/// Status of one connection, returned for `get_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    /// Server-assigned connection identifier.
    pub client_id: String,
    /// Authenticated user.
    pub user_id: String,
    /// Current subscription set.
    pub subscriptions: Vec<Topic>,
    /// Always true while the server can answer.
    pub is_connected: bool,
    /// Time of the snapshot.
    pub timestamp: DateTime<Utc>,
}

/// Message sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Sent once after the connection is registered.
    ConnectionEstablished {
        /// Server-assigned connection identifier.
        client_id: String,
        /// Authenticated user.
        user_id: String,
        /// Registration time.
        timestamp: DateTime<Utc>,
    },

    /// Reply to `subscribe` with the full resulting set.
    SubscriptionConfirmed {
        /// Subscription set after the change.
        topics: Vec<Topic>,
        /// Reply time.
        timestamp: DateTime<Utc>,
    },

    /// Reply to `unsubscribe` with the full resulting set.
    UnsubscriptionConfirmed {
        /// Subscription set after the change.
        topics: Vec<Topic>,
        /// Reply time.
        timestamp: DateTime<Utc>,
    },

    /// Reply to a client `ping`.
    Pong {
        /// Reply time.
        timestamp: DateTime<Utc>,
    },

    /// Liveness probe; the client answers with `pong`.
    Ping {
        /// Probe time.
        timestamp: DateTime<Utc>,
    },

    /// Reply to `get_status`.
    StatusResponse {
        /// Connection status.
        data: ConnectionStatus,
    },

    /// An insight event matching the connection's subscriptions.
    InsightUpdate {
        /// The event.
        data: InsightEvent,
        /// Delivery time.
        timestamp: DateTime<Utc>,
    },
}

impl ServerMessage {
    /// Creates a connection established message.
    #[must_use]
    pub fn connection_established(client_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self::ConnectionEstablished {
            client_id: client_id.into(),
            user_id: user_id.into(),
            timestamp: Utc::now(),
        }
    }

    /// Creates a subscription confirmation.
    #[must_use]
    pub fn subscription_confirmed(topics: Vec<Topic>) -> Self {
        Self::SubscriptionConfirmed {
            topics,
            timestamp: Utc::now(),
        }
    }

    /// Creates an unsubscription confirmation.
    #[must_use]
    pub fn unsubscription_confirmed(topics: Vec<Topic>) -> Self {
        Self::UnsubscriptionConfirmed {
            topics,
            timestamp: Utc::now(),
        }
    }

    /// Creates a pong message.
    #[must_use]
    pub fn pong() -> Self {
        Self::Pong {
            timestamp: Utc::now(),
        }
    }

    /// Creates a liveness probe stamped with `timestamp`.
    #[must_use]
    pub const fn probe(timestamp: DateTime<Utc>) -> Self {
        Self::Ping { timestamp }
    }

    /// Creates a status response.
    #[must_use]
    pub const fn status(data: ConnectionStatus) -> Self {
        Self::StatusResponse { data }
    }

    /// Creates an insight update.
    #[must_use]
    pub fn insight_update(event: InsightEvent) -> Self {
        Self::InsightUpdate {
            data: event,
            timestamp: Utc::now(),
        }
    }

    /// Returns the wire tag of this message.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::ConnectionEstablished { .. } => "connection_established",
            Self::SubscriptionConfirmed { .. } => "subscription_confirmed",
            Self::UnsubscriptionConfirmed { .. } => "unsubscription_confirmed",
            Self::Pong { .. } => "pong",
            Self::Ping { .. } => "ping",
            Self::StatusResponse { .. } => "status_response",
            Self::InsightUpdate { .. } => "insight_update",
        }
    }
}
