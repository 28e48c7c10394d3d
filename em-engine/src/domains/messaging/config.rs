use std::collections::HashSet;

use derive_setters::Setters;
use serde::{
    Deserialize,
    Serialize,
};
use tracing::warn;

use crate::config::sanitize_f64;

/// Messages per second (produced plus consumed) one broker is sized for.
pub const DEFAULT_BROKER_CAPACITY: f64 = 10_000.0;
/// Time-based retention when a topic sets none (7 days).
pub const DEFAULT_RETENTION_SECS: u64 = 7 * 24 * 3600;

/// Per-partition cap on retained messages, applied on top of time-based retention.
pub const DEFAULT_MAX_MESSAGES_PER_PARTITION: usize = 10_000;

/// Message broker node config.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Setters)]
#[serde(default, rename_all = "camelCase")]
pub struct MessagingConfig {
    /// Topics to create; empty and duplicate names are dropped.
    pub topics: Vec<TopicConfig>,
    /// Consumer groups, each reading one topic.
    pub consumer_groups: Vec<ConsumerGroupConfig>,
    /// Size of synthetic messages.
    pub mean_message_bytes: u64,
    /// Size-based retention per partition.
    pub max_messages_per_partition: usize,
    /// Throughput (msg/s) the utilization ratio is measured against.
    pub broker_capacity: f64,
    /// Overrides the node's id-derived RNG seed.
    pub seed: Option<u64>,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            topics: vec![TopicConfig::new("orders", 3, 20.0), TopicConfig::new("events", 1, 5.0)],
            consumer_groups: vec![
                ConsumerGroupConfig::new("order-service", "orders", 15.0),
                ConsumerGroupConfig::new("analytics", "events", 10.0),
            ],
            mean_message_bytes: 1024,
            max_messages_per_partition: DEFAULT_MAX_MESSAGES_PER_PARTITION,
            broker_capacity: DEFAULT_BROKER_CAPACITY,
            seed: None,
        }
    }
}

impl MessagingConfig {
    pub(crate) fn normalize(&mut self) {
        let defaults = Self::default();
        sanitize_f64(
            &mut self.broker_capacity,
            f64::MIN_POSITIVE,
            f64::MAX,
            defaults.broker_capacity,
            "brokerCapacity",
        );
        if self.mean_message_bytes == 0 {
            self.mean_message_bytes = defaults.mean_message_bytes;
        }
        if self.max_messages_per_partition == 0 {
            self.max_messages_per_partition = defaults.max_messages_per_partition;
        }

        let mut seen = HashSet::new();
        self.topics.retain(|t| {
            let keep = !t.name.trim().is_empty() && seen.insert(t.name.clone());
            if !keep {
                warn!(topic = %t.name, "dropping empty or duplicate topic name");
            }
            keep
        });
        for topic in &mut self.topics {
            topic.partitions = topic.partitions.max(1);
            sanitize_f64(&mut topic.produce_rate, 0.0, 100_000.0, 0.0, "produceRate");
            if topic.retention_secs == 0 {
                topic.retention_secs = DEFAULT_RETENTION_SECS;
            }
        }

        let mut seen = HashSet::new();
        self.consumer_groups.retain(|g| {
            let keep = !g.name.trim().is_empty() && seen.insert(g.name.clone());
            if !keep {
                warn!(group = %g.name, "dropping empty or duplicate consumer group name");
            }
            keep
        });
        for group in &mut self.consumer_groups {
            sanitize_f64(&mut group.consume_rate, 0.0, 100_000.0, 0.0, "consumeRate");
        }
    }
}

/// One topic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Setters)]
#[serde(default, rename_all = "camelCase")]
#[setters(into)]
pub struct TopicConfig {
    /// Topic name, unique per node.
    pub name: String,
    /// Partition count, at least 1.
    pub partitions: u32,
    /// Messages older than this are expired.
    pub retention_secs: u64,

    /// Synthetic producer rate, in messages per second.
    pub produce_rate: f64,
}

impl TopicConfig {
    /// Topic with the default retention.
    #[must_use]
    pub fn new(name: &str, partitions: u32, produce_rate: f64) -> Self {
        Self { name: name.into(), partitions, retention_secs: DEFAULT_RETENTION_SECS, produce_rate }
    }
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self::new("", 1, 0.0)
    }
}

/// One consumer group.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, Setters)]
#[serde(default, rename_all = "camelCase")]
#[setters(into)]
pub struct ConsumerGroupConfig {
    /// Group name, unique per node.
    pub name: String,
    /// Topic the group reads.
    pub topic: String,

    /// Synthetic consumer rate, in messages per second across all partitions.
    pub consume_rate: f64,
}

impl ConsumerGroupConfig {
    /// Group reading `topic` at `consume_rate` msg/s.
    #[must_use]
    pub fn new(name: &str, topic: &str, consume_rate: f64) -> Self {
        Self { name: name.into(), topic: topic.into(), consume_rate }
    }
}
