//! Pulsecast SDK - wire protocol and client library.
//!
//! This crate defines the frames exchanged between Pulsecast workers and
//! their clients, and provides an async WebSocket client for consuming
//! insight streams.
//!
//! # Protocol Types
//!
//! - [`Topic`]: Closed set of subscribable insight categories
//! - [`Priority`]: Event priority (high/medium/low)
//! - [`InsightEvent`]: An analytics event produced upstream
//! - [`ClientMessage`] / [`ServerMessage`]: Tagged JSON frames
//!
//! # Example
//!
//! ```rust,ignore
//! use pulsecast_sdk::ws::{PulseClient, WsConfig};
//! use pulsecast_sdk::Topic;
//!
//! let client = PulseClient::connect(WsConfig::new("ws://localhost:8080/ws", "token")).await?;
//! client.subscribe(&[Topic::TrendUpdate]).await?;
//! let frame = client.next_event().await?;
//! ```

pub mod protocol;
pub mod ws;

pub use protocol::{
    ClientMessage, ConnectionStatus, InsightEvent, Priority, ProtocolError, RegistryStats,
    ServerMessage, Topic,
};
