//! Connection registry.
//!
//! Arena of connection records keyed by [`ConnectionId`] plus a user index
//! used for per-user fan-out. The registry is owned by the hub task and is
//! never shared, so every method takes `&self` or `&mut self` directly.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use pulsecast_sdk::RegistryStats;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::connection::{ConnectionId, ConnectionRecord, DeliveryError};
use super::metrics::WsMetrics;

/// Encodes a frame once so it can be queued to many connections.
///
/// # Errors
///
/// Returns [`DeliveryError::Encode`] if serialization fails.
pub fn encode<M: Serialize + ?Sized>(message: &M) -> Result<Arc<str>, DeliveryError> {
    serde_json::to_string(message)
        .map(Arc::from)
        .map_err(|e| DeliveryError::Encode(e.to_string()))
}

/// Per-worker connection registry.
#[derive(Debug)]
pub struct Registry {
    connections: HashMap<ConnectionId, ConnectionRecord>,
    users: HashMap<String, HashSet<ConnectionId>>,
    next_id: u64,
    metrics: Arc<WsMetrics>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(metrics: Arc<WsMetrics>) -> Self {
        Self {
            connections: HashMap::new(),
            users: HashMap::new(),
            next_id: 1,
            metrics,
        }
    }

    /// Returns the metrics the registry records into.
    #[must_use]
    pub fn metrics(&self) -> &Arc<WsMetrics> {
        &self.metrics
    }

    /// Registers a connection whose frames are written from `sender`.
    pub fn register(
        &mut self,
        user_id: impl Into<String>,
        sender: mpsc::Sender<Arc<str>>,
    ) -> ConnectionId {
        let id = ConnectionId::new(self.next_id);
        self.next_id += 1;

        let record = ConnectionRecord::new(id, user_id, sender);
        self.users
            .entry(record.user_id.clone())
            .or_default()
            .insert(id);
        debug!(conn_id = %id, user_id = %record.user_id, "connection registered");
        self.connections.insert(id, record);
        self.metrics.record_connection_opened();

        id
    }

    /// Removes a connection from both indices.
    ///
    /// Dropping the returned record closes its outbound queue, which makes
    /// the writer close the socket.
    pub fn unregister(&mut self, id: ConnectionId) -> Option<ConnectionRecord> {
        let record = self.connections.remove(&id)?;

        if let Some(ids) = self.users.get_mut(&record.user_id) {
            ids.remove(&id);
            if ids.is_empty() {
                self.users.remove(&record.user_id);
            }
        }

        self.metrics.record_connection_closed();
        debug!(conn_id = %id, user_id = %record.user_id, "connection unregistered");
        Some(record)
    }

    /// Returns the record for `id`.
    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<&ConnectionRecord> {
        self.connections.get(&id)
    }

    /// Returns the mutable record for `id`.
    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut ConnectionRecord> {
        self.connections.get_mut(&id)
    }

    /// Returns true if `id` is registered.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Returns the number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Returns the number of users with at least one connection.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Returns true if `user_id` has a key in the user index.
    #[must_use]
    pub fn has_user(&self, user_id: &str) -> bool {
        self.users.contains_key(user_id)
    }

    /// Returns the connections of `user_id` in handle order.
    #[must_use]
    pub fn connections_for_user(&self, user_id: &str) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self
            .users
            .get(user_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    /// Returns every registered handle in handle order.
    #[must_use]
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Marks a connection as having answered the last probe.
    pub fn mark_alive(&mut self, id: ConnectionId) -> bool {
        match self.connections.get_mut(&id) {
            Some(record) => {
                record.alive = true;
                true
            }
            None => false,
        }
    }

    /// Queues an encoded frame to one connection.
    ///
    /// A closed or full queue evicts the connection; the send is not
    /// retried.
    ///
    /// # Errors
    ///
    /// Returns the delivery failure.
    pub fn send_text(&mut self, id: ConnectionId, frame: Arc<str>) -> Result<(), DeliveryError> {
        let record = self
            .connections
            .get(&id)
            .ok_or(DeliveryError::UnknownConnection(id))?;

        match record.try_send(frame) {
            Ok(()) => {
                self.metrics.record_message_sent();
                Ok(())
            }
            Err(e) => {
                warn!(conn_id = %id, error = %e, "delivery failed, evicting connection");
                self.metrics.record_error();
                self.unregister(id);
                Err(e)
            }
        }
    }

    /// Sends a message to one connection.
    ///
    /// # Errors
    ///
    /// Returns the delivery failure.
    pub fn send_one<M: Serialize + ?Sized>(
        &mut self,
        id: ConnectionId,
        message: &M,
    ) -> Result<(), DeliveryError> {
        let frame = encode(message)?;
        self.send_text(id, frame)
    }

    /// Sends a message to every connection of `user_id`.
    ///
    /// Returns the number of connections the frame was queued to.
    ///
    /// # Errors
    ///
    /// Returns an error only if the message cannot be encoded.
    pub fn send_to_user<M: Serialize + ?Sized>(
        &mut self,
        user_id: &str,
        message: &M,
    ) -> Result<usize, DeliveryError> {
        let frame = encode(message)?;
        Ok(self.deliver(self.connections_for_user(user_id), &frame))
    }

    /// Sends a message to every registered connection.
    ///
    /// # Errors
    ///
    /// Returns an error only if the message cannot be encoded.
    pub fn broadcast<M: Serialize + ?Sized>(&mut self, message: &M) -> Result<usize, DeliveryError> {
        let frame = encode(message)?;
        Ok(self.deliver(self.ids(), &frame))
    }

    /// Queues `frame` to each of `ids` independently.
    pub(crate) fn deliver(&mut self, ids: Vec<ConnectionId>, frame: &Arc<str>) -> usize {
        ids.into_iter()
            .filter(|id| self.send_text(*id, Arc::clone(frame)).is_ok())
            .count()
    }

    /// Returns connection, user and per-topic counts.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let mut subscriptions_by_topic = BTreeMap::new();
        for record in self.connections.values() {
            for topic in &record.subscriptions {
                *subscriptions_by_topic
                    .entry(topic.as_str().to_string())
                    .or_default() += 1;
            }
        }

        RegistryStats {
            total_connections: self.connections.len(),
            unique_users: self.users.len(),
            subscriptions_by_topic,
        }
    }

    /// Removes every connection, closing their sockets.
    pub fn close_all(&mut self) -> usize {
        let closed = self.connections.len();
        for _ in self.connections.drain() {
            self.metrics.record_connection_closed();
        }
        self.users.clear();
        closed
    }
}

#[cfg(test)]
mod tests {
    use pulsecast_sdk::{ServerMessage, Topic};

    use super::*;

    fn registry() -> Registry {
        Registry::new(Arc::new(WsMetrics::new()))
    }

    fn channel() -> (mpsc::Sender<Arc<str>>, mpsc::Receiver<Arc<str>>) {
        mpsc::channel(8)
    }

    #[test]
    fn test_register_indexes_user() {
        let mut registry = registry();
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();

        let a = registry.register("alice", tx1);
        let b = registry.register("alice", tx2);

        assert_ne!(a, b);
        assert_eq!(registry.connection_count(), 2);
        assert_eq!(registry.user_count(), 1);
        assert_eq!(registry.connections_for_user("alice"), vec![a, b]);
        assert_eq!(registry.metrics().connections_opened(), 2);
    }

    #[test]
    fn test_unregister_removes_empty_user_key() {
        let mut registry = registry();
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();
        let a = registry.register("alice", tx1);
        let b = registry.register("alice", tx2);

        assert!(registry.unregister(a).is_some());
        assert!(registry.has_user("alice"));

        assert!(registry.unregister(b).is_some());
        assert!(!registry.has_user("alice"));
        assert_eq!(registry.user_count(), 0);
        assert!(registry.unregister(b).is_none());
        assert_eq!(registry.metrics().connections_closed(), 2);
    }

    #[tokio::test]
    async fn test_send_one() {
        let mut registry = registry();
        let (tx, mut rx) = channel();
        let id = registry.register("alice", tx);

        registry.send_one(id, &ServerMessage::pong()).expect("send");

        let frame = rx.recv().await.expect("frame");
        let value: serde_json::Value = serde_json::from_str(&frame).expect("json");
        assert_eq!(value["type"], "pong");
        assert_eq!(registry.metrics().messages_sent(), 1);
    }

    #[test]
    fn test_send_one_unknown() {
        let mut registry = registry();
        let result = registry.send_one(ConnectionId::new(99), &ServerMessage::pong());
        assert_eq!(result, Err(DeliveryError::UnknownConnection(ConnectionId::new(99))));
    }

    #[test]
    fn test_send_failure_evicts_only_that_connection() {
        let mut registry = registry();
        let (tx1, rx1) = channel();
        let (tx2, _rx2) = channel();
        let dead = registry.register("alice", tx1);
        let live = registry.register("alice", tx2);
        drop(rx1);

        let delivered = registry
            .send_to_user("alice", &ServerMessage::pong())
            .expect("encode");

        assert_eq!(delivered, 1);
        assert!(!registry.contains(dead));
        assert!(registry.contains(live));
        assert_eq!(registry.metrics().errors(), 1);
    }

    #[test]
    fn test_full_queue_evicts() {
        let mut registry = registry();
        let (tx, _rx) = mpsc::channel(1);
        let id = registry.register("alice", tx);

        registry.send_one(id, &ServerMessage::pong()).expect("first");
        let result = registry.send_one(id, &ServerMessage::pong());

        assert_eq!(result, Err(DeliveryError::Backpressure(id)));
        assert!(!registry.contains(id));
        assert!(!registry.has_user("alice"));
    }

    #[tokio::test]
    async fn test_broadcast() {
        let mut registry = registry();
        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();
        registry.register("alice", tx1);
        registry.register("bob", tx2);

        let delivered = registry
            .broadcast(&serde_json::json!({"type": "maintenance"}))
            .expect("encode");

        assert_eq!(delivered, 2);
        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }

    #[test]
    fn test_send_to_unknown_user() {
        let mut registry = registry();
        let delivered = registry
            .send_to_user("ghost", &ServerMessage::pong())
            .expect("encode");
        assert_eq!(delivered, 0);
    }

    #[test]
    fn test_stats() {
        let mut registry = registry();
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();
        let (tx3, _rx3) = channel();
        let a = registry.register("alice", tx1);
        let b = registry.register("alice", tx2);
        registry.register("bob", tx3);
        registry.get_mut(a).expect("a").subscriptions.insert(Topic::TrendUpdate);
        registry.get_mut(b).expect("b").subscriptions.insert(Topic::TrendUpdate);

        let stats = registry.stats();
        assert_eq!(stats.total_connections, 3);
        assert_eq!(stats.unique_users, 2);
        assert_eq!(stats.subscriptions_by_topic.get("trend_update"), Some(&2));
    }

    #[tokio::test]
    async fn test_close_all() {
        let mut registry = registry();
        let (tx1, mut rx1) = channel();
        let (tx2, _rx2) = channel();
        registry.register("alice", tx1);
        registry.register("bob", tx2);

        assert_eq!(registry.close_all(), 2);
        assert_eq!(registry.connection_count(), 0);
        assert_eq!(registry.user_count(), 0);
        assert!(rx1.recv().await.is_none());
    }

    #[test]
    fn test_mark_alive() {
        let mut registry = registry();
        let (tx, _rx) = channel();
        let id = registry.register("alice", tx);
        registry.get_mut(id).expect("record").alive = false;

        assert!(registry.mark_alive(id));
        assert!(registry.get(id).expect("record").alive);
        assert!(!registry.mark_alive(ConnectionId::new(99)));
    }
}
