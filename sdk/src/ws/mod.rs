//! WebSocket client for real-time insight streams.
//!
//! # Example
//!
//! ```rust,ignore
//! use pulsecast_sdk::ws::{PulseClient, WsConfig};
//! use pulsecast_sdk::{ServerMessage, Topic};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = PulseClient::connect(WsConfig::new("ws://localhost:8080/ws", "token")).await?;
//!
//!     client.subscribe(&[Topic::ContentAnalysis, Topic::HighPriorityOnly]).await?;
//!
//!     loop {
//!         if let ServerMessage::InsightUpdate { data, .. } = client.next_event().await? {
//!             println!("{}: {}", data.topic, data.payload);
//!         }
//!     }
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;

pub use client::PulseClient;
pub use config::WsConfig;
pub use error::WsError;
