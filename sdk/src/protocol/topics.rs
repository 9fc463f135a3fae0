//! Subscription topics.
//!
//! Provides the closed topic enumeration and whitelist filtering.

use serde::{Deserialize, Serialize};

/// Insight category a connection may subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// Scored analysis of a piece of content.
    ContentAnalysis,

    /// Predicted engagement for content.
    EngagementPrediction,

    /// Trend movement updates.
    TrendUpdate,

    /// Audience composition insights.
    AudienceInsight,

    /// Performance metric updates.
    PerformanceMetric,

    /// Meta-filter: withhold `low` priority events from this connection.
    HighPriorityOnly,
}

impl Topic {
    /// Every topic, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::ContentAnalysis,
        Self::EngagementPrediction,
        Self::TrendUpdate,
        Self::AudienceInsight,
        Self::PerformanceMetric,
        Self::HighPriorityOnly,
    ];

    /// Parses a topic from its wire name.
    ///
    /// Returns None for names outside the whitelist.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|topic| topic.as_str() == name)
    }

    /// Returns the wire name of the topic.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ContentAnalysis => "content_analysis",
            Self::EngagementPrediction => "engagement_prediction",
            Self::TrendUpdate => "trend_update",
            Self::AudienceInsight => "audience_insight",
            Self::PerformanceMetric => "performance_metric",
            Self::HighPriorityOnly => "high_priority_only",
        }
    }

    /// Keeps the whitelisted names from a requested list.
    ///
    /// Unknown names are dropped silently and duplicates collapse onto their
    /// first occurrence.
    #[must_use]
    pub fn filter_known<S: AsRef<str>>(requested: &[S]) -> Vec<Self> {
        let mut topics = Vec::with_capacity(requested.len());
        for topic in requested.iter().filter_map(|name| Self::parse(name.as_ref())) {
            if !topics.contains(&topic) {
                topics.push(topic);
            }
        }
        topics
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_parse_known() {
        assert_eq!(Topic::parse("trend_update"), Some(Topic::TrendUpdate));
        assert_eq!(
            Topic::parse("high_priority_only"),
            Some(Topic::HighPriorityOnly)
        );
    }

    #[test]
    fn test_topic_parse_unknown() {
        assert_eq!(Topic::parse("billing"), None);
        assert_eq!(Topic::parse("Trend_Update"), None);
        assert_eq!(Topic::parse(""), None);
    }

    #[test]
    fn test_topic_serde_matches_as_str() {
        for topic in Topic::ALL {
            let json = serde_json::to_string(&topic).expect("serialize");
            assert_eq!(json, format!("\"{}\"", topic.as_str()));
        }
    }

    #[test]
    fn test_filter_known_drops_unknown() {
        let topics = Topic::filter_known(&["content_analysis", "payments", "trend_update"]);
        assert_eq!(topics, vec![Topic::ContentAnalysis, Topic::TrendUpdate]);
    }

    #[test]
    fn test_filter_known_collapses_duplicates() {
        let topics = Topic::filter_known(&["trend_update", "trend_update"]);
        assert_eq!(topics, vec![Topic::TrendUpdate]);
    }

    #[test]
    fn test_filter_known_empty() {
        let requested: Vec<String> = Vec::new();
        assert!(Topic::filter_known(&requested).is_empty());
    }
}
