//! Registry statistics shared between workers, the supervisor and operators.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Point-in-time view of one worker's connection registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    /// Registered connections.
    pub total_connections: usize,

    /// Distinct users with at least one connection.
    pub unique_users: usize,

    /// Subscriber count per topic, keyed by wire name.
    pub subscriptions_by_topic: BTreeMap<String, usize>,
}

impl RegistryStats {
    /// Adds another worker's figures to this one.
    ///
    /// Users connected to several workers are counted once per worker.
    pub fn merge(&mut self, other: &Self) {
        self.total_connections += other.total_connections;
        self.unique_users += other.unique_users;
        for (topic, count) in &other.subscriptions_by_topic {
            *self.subscriptions_by_topic.entry(topic.clone()).or_default() += count;
        }
    }
}
