//! Pulsecast worker.
//!
//! One worker accepts authenticated WebSocket connections, keeps them in a
//! per-process registry, routes insight events to matching subscribers,
//! evicts unresponsive peers and serves `/health` and `/metrics` on the same
//! listener.
//!
//! # Modules
//!
//! - [`auth`]: Token verification before the upgrade
//! - [`ws`]: Registry, subscriptions, router, heartbeat and the hub reactor
//! - [`health`]: Health snapshot and flat metrics exposition
//! - [`server`]: Listener, routes and graceful shutdown

pub mod auth;
pub mod config;
pub mod error;
pub mod health;
pub mod server;
pub mod ws;

pub use auth::{AuthError, Authenticator, Identity, IdentityProvider};
pub use config::{AuthConfig, ConfigError, ServerConfig};
pub use error::ServerError;
pub use server::{AppState, Server};
pub use ws::{HubError, HubHandle, WsMetrics};
