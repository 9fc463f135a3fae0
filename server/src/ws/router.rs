//! Message routing.
//!
//! Dispatches decoded client frames to the registry and fans producer events
//! out to the subscribed connections of their user.

use std::sync::Arc;

use pulsecast_sdk::{ClientMessage, InsightEvent, ServerMessage};
use tracing::{debug, trace};

use super::connection::{ConnectionId, DeliveryError};
use super::metrics::WsMetrics;
use super::registry::{encode, Registry};

/// Routes inbound and outbound traffic for one registry.
#[derive(Debug, Clone)]
pub struct MessageRouter {
    metrics: Arc<WsMetrics>,
}

impl MessageRouter {
    /// Creates a router.
    #[must_use]
    pub fn new(metrics: Arc<WsMetrics>) -> Self {
        Self { metrics }
    }

    /// Handles one frame from connection `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is gone or the reply could not be
    /// queued. In the latter case the connection has already been evicted.
    pub fn handle_client_message(
        &self,
        registry: &mut Registry,
        id: ConnectionId,
        message: ClientMessage,
    ) -> Result<(), DeliveryError> {
        trace!(conn_id = %id, tag = message.tag(), "routing client message");

        match message {
            ClientMessage::Subscribe { topics } => {
                let current = registry
                    .subscribe(id, topics.as_slice())
                    .ok_or(DeliveryError::UnknownConnection(id))?;
                debug!(conn_id = %id, ?current, "subscribed");
                registry.send_one(id, &ServerMessage::subscription_confirmed(current))
            }
            ClientMessage::Unsubscribe { topics } => {
                let current = registry
                    .unsubscribe(id, topics.as_slice())
                    .ok_or(DeliveryError::UnknownConnection(id))?;
                debug!(conn_id = %id, ?current, "unsubscribed");
                registry.send_one(id, &ServerMessage::unsubscription_confirmed(current))
            }
            ClientMessage::Ping => {
                registry.mark_alive(id);
                registry.send_one(id, &ServerMessage::pong())
            }
            ClientMessage::Pong => {
                if registry.mark_alive(id) {
                    Ok(())
                } else {
                    Err(DeliveryError::UnknownConnection(id))
                }
            }
            ClientMessage::GetStatus => {
                let status = registry
                    .get(id)
                    .map(|record| record.status())
                    .ok_or(DeliveryError::UnknownConnection(id))?;
                registry.send_one(id, &ServerMessage::status(status))
            }
        }
    }

    /// Delivers `event` to every connection of its user that accepts it.
    ///
    /// Each connection is sent to independently; a failed send evicts that
    /// connection only. Returns the number of connections reached.
    ///
    /// # Errors
    ///
    /// Returns an error only if the event cannot be encoded.
    pub fn route_insight(
        &self,
        registry: &mut Registry,
        event: InsightEvent,
    ) -> Result<usize, DeliveryError> {
        let targets: Vec<ConnectionId> = registry
            .connections_for_user(&event.user_id)
            .into_iter()
            .filter(|id| registry.get(*id).is_some_and(|record| record.accepts(&event)))
            .collect();

        if targets.is_empty() {
            trace!(user_id = %event.user_id, topic = %event.topic, "no matching subscribers");
            return Ok(0);
        }

        let user_id = event.user_id.clone();
        let topic = event.topic;
        let frame = encode(&ServerMessage::insight_update(event))?;
        let delivered = registry.deliver(targets, &frame);

        if delivered > 0 {
            self.metrics.record_insight_delivered();
        }
        debug!(%user_id, %topic, delivered, "insight routed");
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use pulsecast_sdk::{Priority, Topic};
    use serde_json::Value;
    use tokio::sync::mpsc;

    use super::*;

    struct Fixture {
        registry: Registry,
        router: MessageRouter,
    }

    impl Fixture {
        fn new() -> Self {
            let metrics = Arc::new(WsMetrics::new());
            Self {
                registry: Registry::new(Arc::clone(&metrics)),
                router: MessageRouter::new(metrics),
            }
        }

        fn connect(&mut self, user: &str, topics: &[&str]) -> (ConnectionId, mpsc::Receiver<Arc<str>>) {
            let (tx, rx) = mpsc::channel(16);
            let id = self.registry.register(user, tx);
            self.registry.subscribe(id, topics);
            (id, rx)
        }

        fn handle(&mut self, id: ConnectionId, message: ClientMessage) -> Result<(), DeliveryError> {
            self.router
                .handle_client_message(&mut self.registry, id, message)
        }

        fn route(&mut self, event: InsightEvent) -> usize {
            self.router
                .route_insight(&mut self.registry, event)
                .expect("encode")
        }
    }

    fn next_frame(rx: &mut mpsc::Receiver<Arc<str>>) -> Option<Value> {
        rx.try_recv()
            .ok()
            .map(|frame| serde_json::from_str(&frame).expect("json"))
    }

    fn event(topic: Topic, user: &str, priority: Priority) -> InsightEvent {
        InsightEvent::new(topic, user, serde_json::json!({"score": 0.9}), priority)
    }

    #[test]
    fn test_subscribe_replies_with_full_set() {
        let mut fx = Fixture::new();
        let (id, mut rx) = fx.connect("alice", &["trend_update"]);

        fx.handle(
            id,
            ClientMessage::Subscribe {
                topics: vec!["content_analysis".to_string(), "unknown".to_string()],
            },
        )
        .expect("handled");

        let frame = next_frame(&mut rx).expect("reply");
        assert_eq!(frame["type"], "subscription_confirmed");
        assert_eq!(
            frame["topics"],
            serde_json::json!(["content_analysis", "trend_update"])
        );
        assert!(frame["timestamp"].is_string());
    }

    #[test]
    fn test_unsubscribe_replies_with_full_set() {
        let mut fx = Fixture::new();
        let (id, mut rx) = fx.connect("alice", &["trend_update", "content_analysis"]);

        fx.handle(
            id,
            ClientMessage::Unsubscribe {
                topics: vec!["trend_update".to_string()],
            },
        )
        .expect("handled");

        let frame = next_frame(&mut rx).expect("reply");
        assert_eq!(frame["type"], "unsubscription_confirmed");
        assert_eq!(frame["topics"], serde_json::json!(["content_analysis"]));
    }

    #[test]
    fn test_ping_replies_pong_and_marks_alive() {
        let mut fx = Fixture::new();
        let (id, mut rx) = fx.connect("alice", &[]);
        fx.registry.get_mut(id).expect("record").alive = false;

        fx.handle(id, ClientMessage::Ping).expect("handled");

        let frame = next_frame(&mut rx).expect("reply");
        assert_eq!(frame["type"], "pong");
        assert!(fx.registry.get(id).expect("record").alive);
    }

    #[test]
    fn test_pong_marks_alive_without_reply() {
        let mut fx = Fixture::new();
        let (id, mut rx) = fx.connect("alice", &[]);
        fx.registry.get_mut(id).expect("record").alive = false;

        fx.handle(id, ClientMessage::Pong).expect("handled");

        assert!(fx.registry.get(id).expect("record").alive);
        assert!(next_frame(&mut rx).is_none());
    }

    #[test]
    fn test_get_status() {
        let mut fx = Fixture::new();
        let (id, mut rx) = fx.connect("alice", &["audience_insight"]);

        fx.handle(id, ClientMessage::GetStatus).expect("handled");

        let frame = next_frame(&mut rx).expect("reply");
        assert_eq!(frame["type"], "status_response");
        assert_eq!(frame["data"]["userId"], "alice");
        assert_eq!(frame["data"]["isConnected"], true);
        assert_eq!(frame["data"]["subscriptions"], serde_json::json!(["audience_insight"]));
        assert!(frame["data"]["clientId"].as_str().is_some_and(|c| c.ends_with(&format!("-{id}"))));
    }

    #[test]
    fn test_unknown_connection() {
        let mut fx = Fixture::new();
        let result = fx.handle(ConnectionId::new(5), ClientMessage::GetStatus);
        assert_eq!(result, Err(DeliveryError::UnknownConnection(ConnectionId::new(5))));
    }

    #[test]
    fn test_route_isolation_by_topic() {
        let mut fx = Fixture::new();
        let (_id, mut rx) = fx.connect("alice", &["content_analysis"]);

        let delivered = fx.route(event(Topic::AudienceInsight, "alice", Priority::High));

        assert_eq!(delivered, 0);
        assert!(next_frame(&mut rx).is_none());
    }

    #[test]
    fn test_route_isolation_by_user() {
        let mut fx = Fixture::new();
        let (_id, mut rx) = fx.connect("bob", &["content_analysis"]);

        assert_eq!(fx.route(event(Topic::ContentAnalysis, "alice", Priority::High)), 0);
        assert!(next_frame(&mut rx).is_none());
    }

    #[test]
    fn test_route_priority_filter() {
        let mut fx = Fixture::new();
        let (_f, mut filtered) = fx.connect("alice", &["trend_update", "high_priority_only"]);
        let (_p, mut plain) = fx.connect("alice", &["trend_update"]);

        let delivered = fx.route(event(Topic::TrendUpdate, "alice", Priority::Low));

        assert_eq!(delivered, 1);
        assert!(next_frame(&mut filtered).is_none());
        let frame = next_frame(&mut plain).expect("delivered");
        assert_eq!(frame["type"], "insight_update");
        assert_eq!(frame["data"]["priority"], "low");
    }

    #[test]
    fn test_route_fan_out_independence() {
        let mut fx = Fixture::new();
        let (_c1, mut c1) = fx.connect("alice", &["content_analysis"]);
        let (_c2, mut c2) = fx.connect("alice", &["content_analysis", "engagement_prediction"]);

        let delivered = fx.route(event(Topic::EngagementPrediction, "alice", Priority::High));

        assert_eq!(delivered, 1);
        assert!(next_frame(&mut c1).is_none());
        let frame = next_frame(&mut c2).expect("delivered");
        assert_eq!(frame["data"]["topic"], "engagement_prediction");
        assert_eq!(frame["data"]["userId"], "alice");
        assert!(next_frame(&mut c2).is_none());
        assert_eq!(fx.registry.metrics().insights_delivered(), 1);
    }

    #[test]
    fn test_route_skips_dead_connection() {
        let mut fx = Fixture::new();
        let (dead, rx_dead) = fx.connect("alice", &["trend_update"]);
        let (_live, mut rx_live) = fx.connect("alice", &["trend_update"]);
        drop(rx_dead);

        let delivered = fx.route(event(Topic::TrendUpdate, "alice", Priority::Medium));

        assert_eq!(delivered, 1);
        assert!(!fx.registry.contains(dead));
        assert!(next_frame(&mut rx_live).is_some());
    }
}
