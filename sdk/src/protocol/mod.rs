//! Wire protocol.
//!
//! Every frame is a JSON object tagged by a `type` field.
//!
//! # Topics
//!
//! - `content_analysis`, `engagement_prediction`, `trend_update`,
//!   `audience_insight`, `performance_metric`: data categories
//! - `high_priority_only`: meta-filter withholding `low` priority events
//!
//! # Client Frames
//!
//! - `subscribe` / `unsubscribe`: Topic set changes
//! - `ping`: Client-initiated round trip
//! - `pong`: Acknowledgment of a server liveness probe
//! - `get_status`: Connection status query

pub mod event;
pub mod messages;
pub mod stats;
pub mod topics;

pub use event::{InsightEvent, Priority};
pub use messages::{ClientMessage, ConnectionStatus, ProtocolError, ServerMessage};
pub use stats::RegistryStats;
pub use topics::Topic;
