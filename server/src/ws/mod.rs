//! WebSocket fan-out for insight events.
//!
//! Authenticated connections are registered with a per-worker hub that owns
//! every piece of connection state. Clients manage their topic set and
//! answer liveness probes; producers push events through a [`HubHandle`].
//!
//! # Client Frames
//!
//! - `subscribe` / `unsubscribe`: change the topic set, answered with the full set
//! - `ping`: answered with `pong`
//! - `pong`: acknowledges a server probe
//! - `get_status`: answered with `status_response`
//!
//! Unknown tags and unparseable frames are logged and ignored.

pub mod connection;
pub mod handler;
pub mod heartbeat;
pub mod hub;
pub mod metrics;
pub mod registry;
pub mod router;
pub mod subscriptions;

pub use connection::{ConnectionId, ConnectionRecord, DeliveryError};
pub use handler::{ws_handler, ConnectParams, WsState};
pub use heartbeat::{HeartbeatMonitor, SweepOutcome};
pub use hub::{Hub, HubCommand, HubError, HubHandle};
pub use metrics::{WsMetrics, WsMetricsSnapshot};
pub use registry::Registry;
pub use router::MessageRouter;
