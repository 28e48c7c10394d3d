//! Per-node bounded log of simulated operations.
use std::collections::{
    BTreeMap,
    VecDeque,
};
use std::fmt;

use serde::{
    Deserialize,
    Serialize,
};

use crate::stats::{
    self,
    SlidingWindowCounter,
    DEFAULT_RATE_WINDOW,
};
use crate::time::SimTime;

/// Number of records a node keeps before the oldest is evicted.
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

/// Per-target rate counters are swept for idle targets once there are more than this many.
const TARGET_SWEEP_THRESHOLD: usize = 64;

/// Kind of a simulated operation, as shown in the operation feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpKind {
    // object storage
    /// Object write.
    Put,
    /// Object read.
    Get,
    /// Object delete.
    Delete,
    /// Bucket listing.
    List,
    /// Start of a multipart upload.
    MultipartInitiate,
    /// One uploaded part.
    MultipartUploadPart,
    /// Multipart assembly.
    MultipartComplete,
    /// Multipart abort.
    MultipartAbort,
    /// Archive restore request.
    RestoreInitiate,
    /// Metadata or restore-status lookup.
    Head,

    // messaging
    /// Message produced to a topic.
    Publish,
    /// Batch fetched by a consumer group.
    Consume,

    // tracing
    /// Span batch ingested by the tracer.
    RecordSpans,

    // scrape targets
    /// One scrape of a metrics target.
    Scrape,

    // payments
    /// Payment creation.
    Charge,
    /// Full or partial refund.
    Refund,
    /// Cancellation of a payment or bot run.
    Cancel,

    // integration
    /// One integration flow execution.
    FlowRun,

    // relational database
    /// Read query.
    Select,
    /// Row insert.
    Insert,
    /// Row update or delete.
    Update,

    // rpa
    /// Bot run admitted to the queue.
    BotTrigger,
    /// Bot run that finished, logged with its full duration.
    BotRun,
}

impl OpKind {
    /// Wire name, e.g. `MULTIPART_COMPLETE`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Put => "PUT",
            Self::Get => "GET",
            Self::Delete => "DELETE",
            Self::List => "LIST",
            Self::MultipartInitiate => "MULTIPART_INITIATE",
            Self::MultipartUploadPart => "MULTIPART_UPLOAD_PART",
            Self::MultipartComplete => "MULTIPART_COMPLETE",
            Self::MultipartAbort => "MULTIPART_ABORT",
            Self::RestoreInitiate => "RESTORE_INITIATE",
            Self::Head => "HEAD",
            Self::Publish => "PUBLISH",
            Self::Consume => "CONSUME",
            Self::RecordSpans => "RECORD_SPANS",
            Self::Scrape => "SCRAPE",
            Self::Charge => "CHARGE",
            Self::Refund => "REFUND",
            Self::Cancel => "CANCEL",
            Self::FlowRun => "FLOW_RUN",
            Self::Select => "SELECT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::BotTrigger => "BOT_TRIGGER",
            Self::BotRun => "BOT_RUN",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an operation succeeded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// The operation did what it was asked.
    Success,
    /// The operation was rejected or failed.
    Error,
}

/// One simulated operation.  Records are never mutated after they are appended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRecord {
    /// Simulated time the operation completed at.
    pub timestamp: SimTime,
    /// What the operation was.
    pub kind: OpKind,
    /// Synthetic latency.
    pub latency_ms: f64,
    /// Success or error.
    pub outcome: Outcome,
    /// Payload size, for operations that move bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,

    /// The domain entity the operation touched (bucket, topic, flow, ...), used for per-entity
    /// breakdowns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl OperationRecord {
    /// Record without size or target.
    #[must_use]
    pub const fn new(timestamp: SimTime, kind: OpKind, latency_ms: f64, outcome: Outcome) -> Self {
        Self { timestamp, kind, latency_ms, outcome, size_bytes: None, target: None }
    }

    /// Successful record.
    #[must_use]
    pub const fn success(timestamp: SimTime, kind: OpKind, latency_ms: f64) -> Self {
        Self::new(timestamp, kind, latency_ms, Outcome::Success)
    }

    /// Failed record.
    #[must_use]
    pub const fn error(timestamp: SimTime, kind: OpKind, latency_ms: f64) -> Self {
        Self::new(timestamp, kind, latency_ms, Outcome::Error)
    }

    /// Attach the number of bytes moved.
    #[must_use]
    pub const fn with_size(mut self, size_bytes: u64) -> Self {
        self.size_bytes = Some(size_bytes);
        self
    }

    /// Attach the entity the operation touched.
    #[must_use]
    pub fn with_target(mut self, target: &str) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Whether the operation failed.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.outcome == Outcome::Error
    }
}

/// Latency distribution over the buffered records.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencySummary {
    /// Mean latency.
    pub avg_ms: f64,
    /// Median latency.
    pub p50_ms: f64,
    /// 95th percentile latency.
    pub p95_ms: f64,
    /// 99th percentile latency.
    pub p99_ms: f64,
    /// Slowest sample.
    pub max_ms: f64,
}

impl LatencySummary {
    /// Summarize an unsorted latency sample.
    #[must_use]
    pub fn from_samples(latencies: &[f64]) -> Self {
        let mut sorted = latencies.to_vec();
        sorted.sort_by(f64::total_cmp);
        Self {
            avg_ms: stats::mean(&sorted),
            p50_ms: stats::percentile(&sorted, 50.0),
            p95_ms: stats::percentile(&sorted, 95.0),
            p99_ms: stats::percentile(&sorted, 99.0),
            max_ms: sorted.last().copied().unwrap_or(0.0),
        }
    }
}

/// Aggregate view of a log (or of the slice of it touching one target).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSummary {
    /// Operations per kind.
    pub counts_by_kind: BTreeMap<OpKind, u64>,
    /// Number of operations.
    pub total_operations: u64,
    /// Number of failed operations.
    pub total_errors: u64,

    /// Error fraction over the buffered (recent) records.
    pub error_rate: f64,
    /// Latency distribution over the buffered records.
    pub latency: LatencySummary,

    /// Operations per second over `(now - 1s, now]`.  Counted outside the ring buffer, so it keeps
    /// up with rates the buffer cannot hold.
    pub throughput: f64,
    /// Bytes moved by successful operations.
    pub bytes_transferred: u64,
}

/// Fixed-capacity ring buffer of [`OperationRecord`]s plus cumulative counters that survive
/// eviction.
#[derive(Clone, Debug)]
pub struct OperationLog {
    capacity: usize,
    records: VecDeque<OperationRecord>,
    totals: BTreeMap<OpKind, u64>,
    total_errors: u64,
    total_bytes: u64,
    rate: SlidingWindowCounter,
    target_rates: BTreeMap<String, SlidingWindowCounter>,
}

impl OperationLog {
    /// Empty log holding at most `capacity` records (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: VecDeque::with_capacity(capacity),
            totals: BTreeMap::new(),
            total_errors: 0,
            total_bytes: 0,
            rate: SlidingWindowCounter::default(),
            target_rates: BTreeMap::new(),
        }
    }

    /// Append a record, evicting the oldest one if the buffer is full.  Counters saturate rather
    /// than overflow.
    pub fn append(&mut self, record: OperationRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }

        let total = self.totals.entry(record.kind).or_default();
        *total = total.saturating_add(1);
        if record.is_error() {
            self.total_errors = self.total_errors.saturating_add(1);
        } else if let Some(size) = record.size_bytes {
            self.total_bytes = self.total_bytes.saturating_add(size);
        }

        self.rate.record(record.timestamp);
        if let Some(target) = &record.target {
            self.record_target(target, record.timestamp);
        }
        self.records.push_back(record);
    }

    fn record_target(&mut self, target: &str, ts: SimTime) {
        if let Some(counter) = self.target_rates.get_mut(target) {
            counter.record(ts);
            return;
        }

        if self.target_rates.len() >= TARGET_SWEEP_THRESHOLD {
            let cutoff = ts - DEFAULT_RATE_WINDOW;
            self.target_rates.retain(|_, c| c.latest().is_some_and(|latest| latest > cutoff));
        }
        let mut counter = SlidingWindowCounter::default();
        counter.record(ts);
        self.target_rates.insert(target.into(), counter);
    }

    /// Copy of the buffered records, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<OperationRecord> {
        self.records.iter().cloned().collect()
    }

    /// The newest `limit` records, oldest first.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<OperationRecord> {
        let skip = self.records.len().saturating_sub(limit);
        self.records.iter().skip(skip).cloned().collect()
    }

    /// Number of buffered records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Maximum number of buffered records.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Operations ever appended, including evicted ones.
    #[must_use]
    pub fn total_operations(&self) -> u64 {
        self.totals.values().sum()
    }

    /// Operations of `kind` ever appended.
    #[must_use]
    pub fn count(&self, kind: OpKind) -> u64 {
        self.totals.get(&kind).copied().unwrap_or(0)
    }

    /// Summary of the whole log at `now`.  Totals are cumulative; latency and error rate cover
    /// the buffer.
    #[must_use]
    pub fn summarize(&self, now: SimTime) -> OperationSummary {
        let records = self.snapshot();
        let mut summary = summarize_records(&records);
        summary.counts_by_kind.clone_from(&self.totals);
        summary.total_operations = self.total_operations();
        summary.total_errors = self.total_errors;
        summary.bytes_transferred = self.total_bytes;
        summary.throughput = self.rate.rate(now);
        summary
    }

    /// Summary restricted to the buffered records whose `target` matches.  Counts here only cover
    /// what is still in the buffer; throughput covers every operation against the target.
    #[must_use]
    pub fn summarize_target(&self, target: &str, now: SimTime) -> OperationSummary {
        let records: Vec<_> = self.records.iter().filter(|r| r.target.as_deref() == Some(target)).cloned().collect();
        let mut summary = summarize_records(&records);
        summary.throughput = self.target_rates.get(target).map_or(0.0, |c| c.rate(now));
        summary
    }
}

impl Default for OperationLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

fn summarize_records(records: &[OperationRecord]) -> OperationSummary {
    let mut counts_by_kind = BTreeMap::new();
    let mut total_errors = 0;
    let mut bytes_transferred: u64 = 0;
    for r in records {
        *counts_by_kind.entry(r.kind).or_default() += 1;
        if r.is_error() {
            total_errors += 1;
        } else if let Some(size) = r.size_bytes {
            bytes_transferred = bytes_transferred.saturating_add(size);
        }
    }
    let total_operations = records.len() as u64;
    let latencies: Vec<f64> = records.iter().map(|r| r.latency_ms).collect();

    OperationSummary {
        counts_by_kind,
        total_operations,
        total_errors,
        error_rate: stats::ratio(total_errors, total_operations),
        latency: LatencySummary::from_samples(&latencies),
        throughput: 0.0,
        bytes_transferred,
    }
}

#[cfg(test)]
mod tests;
