//! Pulsecast - real-time insight distribution.
//!
//! Facade over the workspace crates:
//!
//! - [`sdk`]: wire protocol types and the WebSocket client
//! - [`server`]: one worker's connection-serving stack
//! - [`cluster`]: the process supervisor and the `pulsecast` binary

pub use pulsecast_cluster as cluster;
pub use pulsecast_sdk as sdk;
pub use pulsecast_server as server;
