//! Message broker: partitioned topics with retention, and consumer groups tracking committed
//! offsets.
mod config;
mod model;

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{
    Hash,
    Hasher,
};

use em_core::err_impl;
use em_core::prelude::*;
use em_core::stats;
use em_core::time::secs;
use rand::rngs::StdRng;
use rand_distr::{
    Distribution,
    Exp,
};
use serde::{
    Deserialize,
    Serialize,
};
use tracing::{
    debug,
    info,
    warn,
};

pub use self::config::*;
use self::model::Partition;
pub use self::model::{
    GroupStats,
    PartitionStats,
    TopicStats,
};
use crate::config::{
    ComponentConfig,
    ComponentKind,
};
use crate::engine::{
    expect_variant,
    settle,
    Completed,
    DomainQuery,
    DomainView,
    OpContext,
    OperationRequest,
    OperationResult,
    ResponseDetail,
    RoutingEngine,
};
use crate::errors::EngineError;
use crate::load::{
    rng_from_seed,
    LoadGenerator,
};
use crate::metrics::{
    DomainMetrics,
    MetricsSnapshot,
};

/// Largest batch a single consume call may fetch.
pub const MAX_FETCH_MESSAGES: usize = 1000;

err_impl! {MessagingError,
    #[error("topic not found: {0}")]
    TopicNotFound(String),

    #[error("consumer group not found: {0}")]
    GroupNotFound(String),
}

/// An explicit broker operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessagingRequest {
    /// Keyed messages always land on the same partition; unkeyed ones are spread round-robin.
    #[serde(rename_all = "camelCase")]
    Publish {
        /// Destination topic.
        topic: String,
        /// Partitioning key.
        #[serde(default)]
        key: Option<String>,
        /// Message size.
        size_bytes: u64,
    },

    /// Fetch up to `max_messages` for a group and commit past them.
    #[serde(rename_all = "camelCase")]
    Consume {
        /// Consuming group.
        group: String,
        /// Batch limit, capped at [`MAX_FETCH_MESSAGES`].
        max_messages: usize,
    },
}

impl MessagingRequest {
    /// Operation kind recorded in the log for this request.
    #[must_use]
    pub const fn op_kind(&self) -> OpKind {
        match self {
            Self::Publish { .. } => OpKind::Publish,
            Self::Consume { .. } => OpKind::Consume,
        }
    }
}

/// Result of a [`MessagingRequest`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessagingResponse {
    /// Where a published message landed.
    Published {
        /// Topic written to.
        topic: String,
        /// Partition chosen.
        partition: usize,
        /// Offset assigned to the message.
        offset: u64,
    },
    /// What a consume call fetched.
    Consumed {
        /// Consuming group.
        group: String,
        /// Topic the group reads.
        topic: String,
        /// Messages fetched.
        messages: u64,
        /// Bytes fetched.
        bytes: u64,
        /// Group lag after the fetch.
        lag: u64,
    },
}

/// Read-only broker queries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessagingQuery {
    /// Stats for every topic.
    Topics,
    /// Stats for one topic.
    Topic(String),
    /// Stats for every consumer group.
    ConsumerGroups,
    /// The newest operation records.
    RecentOperations {
        /// At most this many records.
        limit: usize,
    },
}

/// Answer to a [`MessagingQuery`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessagingView {
    /// Every topic.
    Topics(Vec<TopicStats>),
    /// One topic.
    Topic(TopicStats),
    /// Every consumer group.
    Groups(Vec<GroupStats>),
    /// Operation records.
    Operations(Vec<OperationRecord>),
}

/// Broker part of a node's metrics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagingMetrics {
    /// Per-topic stats.
    pub topics: BTreeMap<String, TopicStats>,
    /// Per-group stats.
    pub groups: BTreeMap<String, GroupStats>,
    /// Lag summed over all groups.
    pub total_lag: u64,
    /// Messages published so far.
    pub published: u64,
    /// Messages consumed so far.
    pub consumed: u64,
    /// Messages removed by retention so far.
    pub expired: u64,
}

struct Topic {
    config: TopicConfig,
    partitions: Vec<Partition>,
    next_partition: usize,
    published: u64,
    expired: u64,
}

impl Topic {
    fn new(config: TopicConfig) -> Self {
        let partitions = (0..config.partitions.max(1)).map(|_| Partition::default()).collect();
        Self { config, partitions, next_partition: 0, published: 0, expired: 0 }
    }

    fn partition_for(&mut self, key: Option<&str>) -> usize {
        let n = self.partitions.len();
        match key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                usize::try_from(hasher.finish() % n as u64).unwrap_or(0)
            },
            None => {
                let p = self.next_partition % n;
                self.next_partition = self.next_partition.wrapping_add(1);
                p
            },
        }
    }

    fn stats(&self) -> TopicStats {
        TopicStats {
            name: self.config.name.clone(),
            partitions: self.partitions.iter().enumerate().map(|(i, p)| p.stats(i)).collect(),
            retained_messages: self.partitions.iter().map(Partition::retained).sum(),
            retained_bytes: self.partitions.iter().map(Partition::retained_bytes).fold(0, u64::saturating_add),
            published: self.published,
            expired: self.expired,
        }
    }
}

struct Group {
    config: ConsumerGroupConfig,
    committed: Vec<u64>,
    consumed: u64,
    skipped: u64,
}

impl Group {
    fn lag(&self, topic: Option<&Topic>) -> u64 {
        let Some(topic) = topic else {
            return 0;
        };
        topic
            .partitions
            .iter()
            .enumerate()
            .map(|(i, p)| p.high_water_mark().saturating_sub(self.committed.get(i).copied().unwrap_or(0)))
            .sum()
    }
}

enum Due {
    Produce(String),
    Consume(String),
}

/// Simulates one message broker node.
pub struct MessagingEngine {
    config: MessagingConfig,
    topics: BTreeMap<String, Topic>,
    groups: BTreeMap<String, Group>,
    producers: BTreeMap<String, LoadGenerator>,
    consumers: BTreeMap<String, LoadGenerator>,
    log: OperationLog,
    rng: StdRng,
    now: SimTime,
}

impl MessagingEngine {
    /// Engine with the configured topics and groups, all empty.
    #[must_use]
    pub fn new(config: MessagingConfig, seed: u64) -> Self {
        let mut engine = Self {
            config: MessagingConfig::default(),
            topics: BTreeMap::new(),
            groups: BTreeMap::new(),
            producers: BTreeMap::new(),
            consumers: BTreeMap::new(),
            log: OperationLog::default(),
            rng: rng_from_seed(seed),
            now: 0,
        };
        engine.apply_config(config);
        engine
    }

    /// Messages `group` has yet to read, or `None` for an unknown group.
    #[must_use]
    pub fn group_lag(&self, group: &str) -> Option<u64> {
        let g = self.groups.get(group)?;
        Some(g.lag(self.topics.get(&g.config.topic)))
    }

    /// Run one request at the current simulated time and log its outcome.
    pub fn apply(&mut self, request: &MessagingRequest) -> anyhow::Result<Completed<MessagingResponse>> {
        let (outcome, target, size) = match request {
            MessagingRequest::Publish { topic, key, size_bytes } => {
                (self.publish(topic, key.as_deref(), *size_bytes), topic.clone(), Some(*size_bytes))
            },
            MessagingRequest::Consume { group, max_messages } => {
                let outcome = self.consume(group, *max_messages);
                let size = match &outcome {
                    Ok(Completed { value: MessagingResponse::Consumed { bytes, .. }, .. }) => Some(*bytes),
                    _ => None,
                };
                let target = self.groups.get(group).map_or_else(|| group.clone(), |g| g.config.topic.clone());
                (outcome, target, size)
            },
        };

        let mut ctx = OpContext::new(self.now, request.op_kind(), &target);
        if let Some(size) = size {
            ctx = ctx.sized(size);
        }
        settle(&mut self.log, &ctx, outcome)
    }

    #[allow(clippy::cast_precision_loss)]
    fn publish(
        &mut self,
        topic: &str,
        key: Option<&str>,
        size_bytes: u64,
    ) -> anyhow::Result<Completed<MessagingResponse>> {
        let now = self.now;
        let t = self.topics.get_mut(topic).ok_or_else(|| MessagingError::topic_not_found(topic))?;
        let partition = t.partition_for(key);
        let offset = t.partitions[partition].append(now, size_bytes);
        t.published += 1;

        let latency = 2.0 + size_bytes as f64 / (1 << 20) as f64;
        Ok(Completed::new(latency, MessagingResponse::Published { topic: topic.into(), partition, offset }))
    }

    /// Fetch up to `max_messages`, always from the partition furthest behind, and commit.
    #[allow(clippy::cast_precision_loss)]
    fn consume(&mut self, group: &str, max_messages: usize) -> anyhow::Result<Completed<MessagingResponse>> {
        let g = self.groups.get_mut(group).ok_or_else(|| MessagingError::group_not_found(group))?;
        let topic_name = g.config.topic.clone();
        let topic = self.topics.get(&topic_name).ok_or_else(|| MessagingError::topic_not_found(&topic_name))?;

        g.committed.resize(topic.partitions.len(), 0);
        for (committed, partition) in g.committed.iter_mut().zip(&topic.partitions) {
            if *committed < partition.log_start_offset() {
                g.skipped += partition.log_start_offset() - *committed;
                *committed = partition.log_start_offset();
            }
        }

        let (mut messages, mut bytes) = (0, 0_u64);
        for _ in 0..max_messages.min(MAX_FETCH_MESSAGES) {
            let behind = topic
                .partitions
                .iter()
                .enumerate()
                .map(|(i, p)| (i, p.high_water_mark().saturating_sub(g.committed[i])))
                .filter(|(_, lag)| *lag > 0)
                .max_by_key(|(_, lag)| *lag);
            let Some((i, _)) = behind else {
                break;
            };
            bytes = bytes.saturating_add(topic.partitions[i].message(g.committed[i]).map_or(0, |m| m.size_bytes));
            g.committed[i] += 1;
            messages += 1;
        }
        g.consumed += messages;

        let lag = g.lag(Some(topic));
        Ok(Completed::new(
            1.5 + 0.1 * messages as f64,
            MessagingResponse::Consumed { group: group.into(), topic: topic_name, messages, bytes, lag },
        ))
    }

    fn apply_config(&mut self, config: MessagingConfig) {
        let mut topics = BTreeMap::new();
        for topic_config in &config.topics {
            let topic = match self.topics.remove(&topic_config.name) {
                Some(mut existing) => {
                    let wanted = topic_config.partitions.max(1) as usize;
                    if wanted < existing.partitions.len() {
                        warn!(topic = %topic_config.name, "partition count can't shrink; keeping existing partitions");
                    } else {
                        existing.partitions.resize_with(wanted, Partition::default);
                    }
                    existing.config = topic_config.clone();
                    existing
                },
                None => {
                    info!(topic = %topic_config.name, partitions = topic_config.partitions, "topic created");
                    Topic::new(topic_config.clone())
                },
            };
            topics.insert(topic_config.name.clone(), topic);
        }
        self.topics = topics;

        let mut groups = BTreeMap::new();
        for group_config in &config.consumer_groups {
            let group = match self.groups.remove(&group_config.name) {
                Some(mut existing) if existing.config.topic == group_config.topic => {
                    existing.config = group_config.clone();
                    existing
                },
                _ => Group { config: group_config.clone(), committed: vec![], consumed: 0, skipped: 0 },
            };
            if !self.topics.contains_key(&group_config.topic) {
                warn!(
                    group = %group_config.name,
                    topic = %group_config.topic,
                    "consumer group subscribes to unknown topic"
                );
            }
            groups.insert(group_config.name.clone(), group);
        }
        self.groups = groups;

        self.producers.retain(|name, _| config.topics.iter().any(|t| &t.name == name));
        self.consumers.retain(|name, _| config.consumer_groups.iter().any(|g| &g.name == name));
        self.config = config;
    }

    fn expire(&mut self) {
        let max_len = self.config.max_messages_per_partition;
        for topic in self.topics.values_mut() {
            let retention = secs(i64::try_from(topic.config.retention_secs).unwrap_or(i64::MAX / 1000));
            let cutoff = self.now.saturating_sub(retention);
            let removed: u64 = topic.partitions.iter_mut().map(|p| p.expire(cutoff, max_len)).sum();
            if removed > 0 {
                debug!(topic = %topic.config.name, removed, "expired messages");
                topic.expired += removed;
            }
        }
    }

    /// Producer and consumer timestamps due in `(self.now, now]`, merged in time order.
    fn due(&mut self, now: SimTime) -> Vec<(SimTime, Due)> {
        let mut due = vec![];
        for topic in &self.config.topics {
            let load = self.producers.entry(topic.name.clone()).or_default();
            due.extend(load.due(now, topic.produce_rate).into_iter().map(|at| (at, Due::Produce(topic.name.clone()))));
        }
        for group in &self.config.consumer_groups {
            let load = self.consumers.entry(group.name.clone()).or_default();
            due.extend(load.due(now, group.consume_rate).into_iter().map(|at| (at, Due::Consume(group.name.clone()))));
        }
        due.sort_by_key(|(at, _)| *at);
        due
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    fn message_size(&mut self) -> u64 {
        let mean = self.config.mean_message_bytes.max(1) as f64;
        match Exp::new(1.0 / mean) {
            Ok(dist) => (dist.sample(&mut self.rng).round() as u64).max(1),
            Err(_) => self.config.mean_message_bytes,
        }
    }

    fn messaging_query(&self, query: &MessagingQuery) -> anyhow::Result<MessagingView> {
        let view = match query {
            MessagingQuery::Topics => MessagingView::Topics(self.topics.values().map(Topic::stats).collect()),
            MessagingQuery::Topic(name) => {
                let topic = self.topics.get(name).ok_or_else(|| MessagingError::topic_not_found(name))?;
                MessagingView::Topic(topic.stats())
            },
            MessagingQuery::ConsumerGroups => MessagingView::Groups(self.group_stats().into_values().collect()),
            MessagingQuery::RecentOperations { limit } => MessagingView::Operations(self.log.recent(*limit)),
        };
        Ok(view)
    }

    fn group_stats(&self) -> BTreeMap<String, GroupStats> {
        self.groups
            .iter()
            .map(|(name, g)| {
                let stats = GroupStats {
                    name: name.clone(),
                    topic: g.config.topic.clone(),
                    committed: g.committed.clone(),
                    lag: g.lag(self.topics.get(&g.config.topic)),
                    consumed: g.consumed,
                    skipped: g.skipped,
                };
                (name.clone(), stats)
            })
            .collect()
    }

    fn snapshot(&self) -> MetricsSnapshot {
        let topics: BTreeMap<_, _> = self.topics.iter().map(|(name, t)| (name.clone(), t.stats())).collect();
        let groups = self.group_stats();
        let domain = MessagingMetrics {
            total_lag: groups.values().map(|g| g.lag).sum(),
            published: topics.values().map(|t| t.published).sum(),
            consumed: groups.values().map(|g| g.consumed).sum(),
            expired: topics.values().map(|t| t.expired).sum(),
            topics,
            groups,
        };

        let snapshot = MetricsSnapshot::from_log(ComponentKind::MessageBroker, &self.log, self.now);
        let throughput = stats::utilization(snapshot.operations.throughput, self.config.broker_capacity);
        let partitions = self.topics.values().map(|t| t.partitions.len() as u64).sum();
        let messages = domain.topics.values().map(|t| t.retained_messages).sum();

        snapshot
            .with_count("topics", self.topics.len() as u64)
            .with_count("partitions", partitions)
            .with_count("consumerGroups", self.groups.len() as u64)
            .with_count("messages", messages)
            .with_utilization("throughput", throughput)
            .with_domain(DomainMetrics::Messaging(domain))
    }
}

impl RoutingEngine for MessagingEngine {
    fn kind(&self) -> ComponentKind {
        ComponentKind::MessageBroker
    }

    fn reconfigure(&mut self, config: &ComponentConfig) -> EmptyResult {
        let config = expect_variant!(config, ComponentConfig::MessageBroker, "messaging config")?;
        self.apply_config(config.clone());
        Ok(())
    }

    fn advance(&mut self, now: SimTime) -> EmptyResult {
        if now < self.now {
            return Ok(());
        }
        for (at, due) in self.due(now) {
            self.now = at;
            // Failures are already in the log.
            let _ = match due {
                Due::Produce(topic) => {
                    let size_bytes = self.message_size();
                    self.apply(&MessagingRequest::Publish { topic, key: None, size_bytes })
                },
                Due::Consume(group) => self.apply(&MessagingRequest::Consume { group, max_messages: 1 }),
            };
        }
        self.now = now;
        self.expire();
        Ok(())
    }

    fn execute(&mut self, request: &OperationRequest) -> anyhow::Result<OperationResult> {
        let request = expect_variant!(request, OperationRequest::Messaging, "messaging request")?;
        let done = self.apply(request)?;
        Ok(OperationResult { latency_ms: done.latency_ms, detail: ResponseDetail::Messaging(done.value) })
    }

    fn query(&self, query: &DomainQuery) -> anyhow::Result<DomainView> {
        match query {
            DomainQuery::Messaging(q) => Ok(DomainView::Messaging(self.messaging_query(q)?)),
            other => Err(EngineError::unsupported_query(&format!("{other:?}"))),
        }
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.snapshot()
    }
}

#[cfg(test)]
mod tests;
