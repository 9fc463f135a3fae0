//! Subscription management.
//!
//! Requested topic names are filtered against [`Topic::ALL`]; unknown names
//! are dropped without an error and the reply carries the resulting set, so
//! clients detect drops by comparing it with what they asked for.

use pulsecast_sdk::Topic;
use tracing::debug;

use super::connection::ConnectionId;
use super::registry::Registry;

fn unknown_names<S: AsRef<str>>(requested: &[S]) -> Vec<&str> {
    requested
        .iter()
        .map(AsRef::as_ref)
        .filter(|name| Topic::parse(name).is_none())
        .collect()
}

impl Registry {
    /// Adds the known topics among `requested` to a connection.
    ///
    /// Returns the full subscription set afterwards, or `None` if the
    /// connection is not registered.
    pub fn subscribe<S: AsRef<str>>(
        &mut self,
        id: ConnectionId,
        requested: &[S],
    ) -> Option<Vec<Topic>> {
        let metrics = std::sync::Arc::clone(self.metrics());
        let record = self.get_mut(id)?;

        for topic in Topic::filter_known(requested) {
            if record.subscriptions.insert(topic) {
                metrics.record_subscription();
            }
        }

        let dropped = unknown_names(requested);
        if !dropped.is_empty() {
            debug!(conn_id = %id, ?dropped, "ignoring unknown topics");
        }

        Some(record.topics())
    }

    /// Removes the known topics among `requested` from a connection.
    ///
    /// Returns the full subscription set afterwards, or `None` if the
    /// connection is not registered.
    pub fn unsubscribe<S: AsRef<str>>(
        &mut self,
        id: ConnectionId,
        requested: &[S],
    ) -> Option<Vec<Topic>> {
        let metrics = std::sync::Arc::clone(self.metrics());
        let record = self.get_mut(id)?;

        for topic in Topic::filter_known(requested) {
            if record.subscriptions.remove(&topic) {
                metrics.record_unsubscription();
            }
        }

        Some(record.topics())
    }
}
