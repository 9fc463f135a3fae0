//! Insight events produced by the analytics pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::topics::Topic;

/// Delivery priority of an insight event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Urgent insight.
    High,
    /// Regular insight.
    #[default]
    Medium,
    /// Background insight, withheld from `high_priority_only` subscribers.
    Low,
}

/// An analytics event destined for one user's connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightEvent {
    /// Category of the event.
    pub topic: Topic,

    /// User the event belongs to.
    pub user_id: String,

    /// Opaque payload computed upstream.
    pub payload: Value,

    /// When the event was produced.
    pub timestamp: DateTime<Utc>,

    /// Delivery priority.
    #[serde(default)]
    pub priority: Priority,
}

impl InsightEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(topic: Topic, user_id: impl Into<String>, payload: Value, priority: Priority) -> Self {
        Self {
            topic,
            user_id: user_id.into(),
            payload,
            timestamp: Utc::now(),
            priority,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shape() {
        let event = InsightEvent::new(
            Topic::AudienceInsight,
            "user-1",
            serde_json::json!({"segment": "creators"}),
            Priority::High,
        );
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value["topic"], "audience_insight");
        assert_eq!(value["userId"], "user-1");
        assert_eq!(value["priority"], "high");
        assert_eq!(value["payload"]["segment"], "creators");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_event_priority_defaults_to_medium() {
        let json = r#"{"topic":"trend_update","userId":"u","payload":null,"timestamp":"2024-01-01T00:00:00Z"}"#;
        let event: InsightEvent = serde_json::from_str(json).expect("deserialize");
        assert_eq!(event.priority, Priority::Medium);
    }

    #[test]
    fn test_event_rejects_unknown_topic() {
        let json = r#"{"topic":"billing","userId":"u","payload":null,"timestamp":"2024-01-01T00:00:00Z"}"#;
        assert!(serde_json::from_str::<InsightEvent>(json).is_err());
    }
}
