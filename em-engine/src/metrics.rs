//! The value object the UI polls.  Snapshots are plain owned data, so handing one out can never
//! alias live simulation state.
use std::collections::BTreeMap;

use em_core::oplog::{
    OperationLog,
    OperationSummary,
};
use em_core::time::SimTime;
use serde::{
    Deserialize,
    Serialize,
};

use crate::config::ComponentKind;
use crate::domains::database::DatabaseMetrics;
use crate::domains::integration::IntegrationMetrics;
use crate::domains::messaging::MessagingMetrics;
use crate::domains::object_storage::StorageMetrics;
use crate::domains::payment::PaymentMetrics;
use crate::domains::rpa::RpaMetrics;
use crate::domains::scrape::ScrapeMetrics;
use crate::domains::tracer::TracingMetrics;

/// Family-specific part of a [`MetricsSnapshot`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "domain")]
pub enum DomainMetrics {
    /// No engine (yet); the UI renders its static defaults.
    #[default]
    Unavailable,
    /// Object storage metrics.
    Storage(StorageMetrics),
    /// Message broker metrics.
    Messaging(MessagingMetrics),
    /// Relational database metrics.
    Database(DatabaseMetrics),
    /// Tracing backend metrics.
    Tracing(TracingMetrics),
    /// Metrics scraper metrics.
    Scrape(ScrapeMetrics),
    /// Integration platform metrics.
    Integration(IntegrationMetrics),
    /// Payment gateway metrics.
    Payment(PaymentMetrics),
    /// RPA bot metrics.
    Rpa(RpaMetrics),
}

/// Point-in-time metrics for one node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Node the snapshot belongs to.
    pub node_id: String,
    /// Component family of the node.
    pub kind: ComponentKind,
    /// Simulated time the snapshot was taken at.
    pub taken_at: SimTime,

    /// Headline entity counts, e.g. `buckets`, `objects`, `topics`.
    pub entity_counts: BTreeMap<String, u64>,
    /// Counts, error rate, latency and throughput over the operation log.
    pub operations: OperationSummary,

    /// Named utilization ratios in `[0, 1]`.
    pub utilization: BTreeMap<String, f64>,

    /// Panics and errors the node's engine has raised so far.
    pub engine_faults: u64,
    /// Message of the most recent fault.
    pub last_fault: Option<String>,
    /// Family-specific metrics.
    pub domain: DomainMetrics,
}

impl MetricsSnapshot {
    /// Common part of every domain snapshot.
    #[must_use]
    pub fn from_log(kind: ComponentKind, log: &OperationLog, now: SimTime) -> Self {
        Self {
            node_id: String::new(),
            kind,
            taken_at: now,
            entity_counts: BTreeMap::new(),
            operations: log.summarize(now),
            utilization: BTreeMap::new(),
            engine_faults: 0,
            last_fault: None,
            domain: DomainMetrics::Unavailable,
        }
    }

    /// What the UI shows for a node that has no engine, or whose engine hasn't published yet.
    #[must_use]
    pub fn placeholder(node_id: &str, kind: ComponentKind) -> Self {
        Self {
            node_id: node_id.into(),
            kind,
            taken_at: 0,
            entity_counts: BTreeMap::new(),
            operations: OperationSummary::default(),
            utilization: BTreeMap::new(),
            engine_faults: 0,
            last_fault: None,
            domain: DomainMetrics::Unavailable,
        }
    }

    /// Set the headline count `name`.
    #[must_use]
    pub fn with_count(mut self, name: &str, count: u64) -> Self {
        self.entity_counts.insert(name.into(), count);
        self
    }

    /// Set the utilization ratio `name`.
    #[must_use]
    pub fn with_utilization(mut self, name: &str, ratio: f64) -> Self {
        self.utilization.insert(name.into(), ratio);
        self
    }

    /// Attach the family-specific metrics.
    #[must_use]
    pub fn with_domain(mut self, domain: DomainMetrics) -> Self {
        self.domain = domain;
        self
    }

    /// Headline count `name`, or 0 if it was never set.
    #[must_use]
    pub fn entity_count(&self, name: &str) -> u64 {
        self.entity_counts.get(name).copied().unwrap_or(0)
    }
}
