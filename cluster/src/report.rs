//! Worker to supervisor reports.
//!
//! Workers write one JSON object per line on stdout; the supervisor reads
//! them from the pipe. Logs never go to stdout.

use chrono::{DateTime, Utc};
use pulsecast_sdk::RegistryStats;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// A report line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum WorkerReport {
    /// The worker is listening.
    Ready {
        /// Worker process id.
        pid: u32,
    },

    /// Periodic registry figures.
    Stats {
        /// Worker process id.
        pid: u32,
        /// Registry statistics.
        stats: RegistryStats,
        /// Resident memory in bytes.
        memory_bytes: u64,
    },
}

impl WorkerReport {
    /// Returns the reporting process id.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        match self {
            Self::Ready { pid } | Self::Stats { pid, .. } => *pid,
        }
    }

    /// Parses one line; anything that is not a report yields `None`.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        serde_json::from_str(line.trim()).ok()
    }

    /// Writes the report as one line and flushes.
    ///
    /// # Errors
    ///
    /// Returns an error if the line cannot be written.
    pub async fn emit<W>(&self, writer: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await
    }
}

/// Latest figures of one worker, as kept by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerStats {
    /// Registry statistics.
    pub stats: RegistryStats,
    /// Resident memory in bytes.
    pub memory_bytes: u64,
    /// When the report arrived.
    pub received_at: DateTime<Utc>,
}

/// Pool-wide figures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStats {
    /// Live workers.
    pub workers: usize,
    /// Workers that have reported at least once.
    pub reporting: usize,
    /// Summed registry figures.
    pub connections: RegistryStats,
    /// Summed resident memory in bytes.
    pub memory_bytes: u64,
}

impl ClusterStats {
    /// Sums the latest report of every worker.
    ///
    /// A user with connections on two workers counts as two users.
    #[must_use]
    pub fn aggregate<'a, I>(workers: usize, reports: I) -> Self
    where
        I: IntoIterator<Item = &'a WorkerStats>,
    {
        let mut total = Self {
            workers,
            ..Self::default()
        };
        for report in reports {
            total.reporting += 1;
            total.connections.merge(&report.stats);
            total.memory_bytes += report.memory_bytes;
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn stats(connections: usize, users: usize, trend: usize) -> RegistryStats {
        RegistryStats {
            total_connections: connections,
            unique_users: users,
            subscriptions_by_topic: BTreeMap::from([("trend_update".to_string(), trend)]),
        }
    }

    #[test]
    fn test_report_wire_shape() {
        let report = WorkerReport::Stats {
            pid: 7,
            stats: stats(2, 1, 1),
            memory_bytes: 4096,
        };
        let value = serde_json::to_value(&report).expect("serialize");
        assert_eq!(value["type"], "stats");
        assert_eq!(value["pid"], 7);
        assert_eq!(value["memoryBytes"], 4096);
        assert_eq!(value["stats"]["totalConnections"], 2);
    }

    #[test]
    fn test_parse_ready() {
        let report = WorkerReport::parse("{\"type\":\"ready\",\"pid\":12}\n").expect("report");
        assert_eq!(report, WorkerReport::Ready { pid: 12 });
        assert_eq!(report.pid(), 12);
    }

    #[test]
    fn test_parse_ignores_noise() {
        assert!(WorkerReport::parse("").is_none());
        assert!(WorkerReport::parse("listening on 0.0.0.0:8080").is_none());
        assert!(WorkerReport::parse(r#"{"type":"unknown","pid":1}"#).is_none());
    }

    #[tokio::test]
    async fn test_emit_writes_one_line() {
        let mut out: Vec<u8> = Vec::new();
        WorkerReport::Ready { pid: 3 }.emit(&mut out).await.expect("emit");
        WorkerReport::Ready { pid: 4 }.emit(&mut out).await.expect("emit");

        let text = String::from_utf8(out).expect("utf8");
        let parsed: Vec<WorkerReport> = text.lines().filter_map(WorkerReport::parse).collect();
        assert_eq!(
            parsed,
            vec![WorkerReport::Ready { pid: 3 }, WorkerReport::Ready { pid: 4 }]
        );
    }

    #[test]
    fn test_aggregate_sums_workers() {
        let a = WorkerStats {
            stats: stats(3, 2, 1),
            memory_bytes: 100,
            received_at: Utc::now(),
        };
        let b = WorkerStats {
            stats: stats(1, 1, 1),
            memory_bytes: 50,
            received_at: Utc::now(),
        };

        let total = ClusterStats::aggregate(3, [&a, &b]);

        assert_eq!(total.workers, 3);
        assert_eq!(total.reporting, 2);
        assert_eq!(total.connections.total_connections, 4);
        assert_eq!(total.connections.unique_users, 3);
        assert_eq!(total.connections.subscriptions_by_topic["trend_update"], 2);
        assert_eq!(total.memory_bytes, 150);
    }
}
