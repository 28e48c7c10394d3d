//! Distributed-tracing backend: ingests spans, groups them into traces, and rebuilds span trees for
//! the trace viewer.
mod config;
mod generator;
mod model;
mod trace_tree;

use std::collections::{
    BTreeMap,
    VecDeque,
};

use em_core::err_impl;
use em_core::oplog::LatencySummary;
use em_core::prelude::*;
use em_core::stats::{
    self,
    SlidingWindowCounter,
};
use rand::rngs::StdRng;
use serde::{
    Deserialize,
    Serialize,
};
use tracing::debug;

pub use self::config::*;
pub use self::generator::MAX_SPANS_PER_TRACE;
use self::generator::TraceGenerator;
pub use self::model::*;
pub use self::trace_tree::{
    SpanForest,
    SpanNode,
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

/// Rough wire size of one span, for the bytes-transferred counter.
const SPAN_WIRE_BYTES: u64 = 512;

err_impl! {TracingError,
    #[error("trace not found: {0}")]
    TraceNotFound(String),
}

/// An explicit tracing backend operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TracingRequest {
    /// Ingest a batch of spans, grouping them into traces.
    RecordSpans(Vec<Span>),
}

/// Result of a [`TracingRequest`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TracingResponse {
    /// Spans without a trace or span id are dropped.
    Recorded {
        /// Spans stored.
        accepted: usize,
        /// Spans rejected.
        dropped: usize,
        /// Traces the accepted spans belong to.
        traces: Vec<String>,
    },
}

/// Read-only tracing queries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TracingQuery {
    /// One trace with its span tree.
    Trace(String),

    /// The newest traces, optionally filtered.
    #[serde(rename_all = "camelCase")]
    RecentTraces {
        /// At most this many traces.
        limit: usize,
        /// Only traces with a span from this service.
        #[serde(default)]
        service: Option<String>,
        /// Only traces with at least one error span.
        #[serde(default)]
        errors_only: bool,
    },
    /// Per-service span stats.
    ServiceStats,
    /// The newest operation records.
    RecentOperations {
        /// At most this many records.
        limit: usize,
    },
}

/// A trace as shown in the trace viewer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceDetail {
    /// Headline numbers.
    pub summary: TraceSummary,
    /// Span tree rebuilt from parent ids.
    pub forest: SpanForest,
}

/// Spans attributed to one service, across retained traces.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStats {
    /// Service name.
    pub service: String,
    /// Spans from the service.
    pub span_count: u64,
    /// Error spans from the service.
    pub error_count: u64,
    /// `error_count / span_count`, 0 without spans.
    pub error_rate: f64,
    /// Span duration distribution.
    pub latency: LatencySummary,
}

/// Answer to a [`TracingQuery`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TracingView {
    /// One trace.
    Trace(TraceDetail),
    /// Trace summaries, newest first.
    Traces(Vec<TraceSummary>),
    /// Per-service stats.
    Services(Vec<ServiceStats>),
    /// Operation records.
    Operations(Vec<OperationRecord>),
}

/// Tracing backend part of a node's metrics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracingMetrics {
    /// Traces currently held.
    pub traces_retained: u64,
    /// Retained traces still waiting for their last span to end.
    pub traces_active: u64,
    /// Distinct traces that have sealed at least once.
    pub traces_sealed: u64,
    /// Traces dropped to stay within `maxTraces`.
    pub traces_evicted: u64,
    /// Retained traces with at least one error span.
    pub error_traces: u64,
    /// Spans accepted so far.
    pub spans_ingested: u64,
    /// Spans rejected so far.
    pub spans_dropped: u64,
    /// Per-service stats.
    pub services: BTreeMap<String, ServiceStats>,
}

/// Simulates one distributed-tracing backend.
pub struct TracerEngine {
    config: TracerConfig,
    traces: BTreeMap<String, Trace>,

    /// Trace ids in arrival order; the front is evicted first.
    order: VecDeque<String>,
    ingested: SlidingWindowCounter,
    spans_ingested: u64,
    spans_dropped: u64,
    traces_sealed: u64,
    traces_evicted: u64,
    log: OperationLog,
    load: LoadGenerator,
    rng: StdRng,
    now: SimTime,
}

impl TracerEngine {
    /// Engine with no traces yet.
    #[must_use]
    pub fn new(config: TracerConfig, seed: u64) -> Self {
        Self {
            config,
            traces: BTreeMap::new(),
            order: VecDeque::new(),
            ingested: SlidingWindowCounter::default(),
            spans_ingested: 0,
            spans_dropped: 0,
            traces_sealed: 0,
            traces_evicted: 0,
            log: OperationLog::default(),
            load: LoadGenerator::new(),
            rng: rng_from_seed(seed),
            now: 0,
        }
    }

    /// A retained trace by id.
    #[must_use]
    pub fn trace(&self, trace_id: &str) -> Option<&Trace> {
        self.traces.get(trace_id)
    }

    /// Run one request at the current simulated time and log its outcome.
    pub fn apply(&mut self, request: &TracingRequest) -> anyhow::Result<Completed<TracingResponse>> {
        let TracingRequest::RecordSpans(spans) = request;
        let outcome = Ok(self.record_spans(spans));
        let ctx = OpContext::new(self.now, OpKind::RecordSpans, "spans").sized(spans.len() as u64 * SPAN_WIRE_BYTES);
        settle(&mut self.log, &ctx, outcome)
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_spans(&mut self, spans: &[Span]) -> Completed<TracingResponse> {
        let mut accepted = 0;
        let mut touched = vec![];
        for span in spans {
            if span.trace_id.is_empty() || span.span_id.is_empty() {
                continue;
            }
            let mut span = span.clone();
            span.end_time = span.end_time.max(span.start_time);

            let trace_id = span.trace_id.clone();
            let trace = self.traces.entry(trace_id.clone()).or_insert_with(|| {
                self.order.push_back(trace_id.clone());
                Trace::new(&trace_id)
            });
            trace.push(span);
            accepted += 1;
            if !touched.contains(&trace_id) {
                touched.push(trace_id);
            }
        }

        let dropped = spans.len() - accepted;
        self.spans_ingested += accepted as u64;
        self.spans_dropped += dropped as u64;
        self.ingested.record_n(self.now, accepted as u64);
        self.evict();
        self.seal();

        Completed::new(
            2.0 + 0.05 * spans.len() as f64,
            TracingResponse::Recorded { accepted, dropped, traces: touched },
        )
    }

    fn evict(&mut self) {
        while self.order.len() > self.config.max_traces {
            if let Some(oldest) = self.order.pop_front() {
                debug!(trace_id = %oldest, "evicting trace");
                self.traces.remove(&oldest);
                self.traces_evicted += 1;
            }
        }
    }

    fn seal(&mut self) {
        let now = self.now;
        for trace in self.traces.values_mut() {
            if !trace.sealed && now >= trace.ended_at {
                trace.sealed = true;
                if !trace.counted {
                    trace.counted = true;
                    self.traces_sealed += 1;
                }
            }
        }
    }

    fn generate_trace(&mut self) {
        let spans = TraceGenerator::new(&self.config, &mut self.rng).generate(self.now);
        if !spans.is_empty() {
            // Ingestion can't fail.
            let _ = self.apply(&TracingRequest::RecordSpans(spans));
        }
    }

    fn service_stats(&self) -> BTreeMap<String, ServiceStats> {
        let mut latencies: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        let mut errors: BTreeMap<&str, u64> = BTreeMap::new();
        for span in self.traces.values().flat_map(|t| &t.spans) {
            latencies.entry(span.service.as_str()).or_default().push(span.duration_ms());
            if span.is_error() {
                *errors.entry(span.service.as_str()).or_default() += 1;
            }
        }

        latencies
            .into_iter()
            .map(|(service, samples)| {
                let span_count = samples.len() as u64;
                let error_count = errors.get(service).copied().unwrap_or(0);
                let stats = ServiceStats {
                    service: service.into(),
                    span_count,
                    error_count,
                    error_rate: stats::ratio(error_count, span_count),
                    latency: LatencySummary::from_samples(&samples),
                };
                (service.to_owned(), stats)
            })
            .collect()
    }

    fn tracing_query(&self, query: &TracingQuery) -> anyhow::Result<TracingView> {
        let view = match query {
            TracingQuery::Trace(trace_id) => {
                let trace = self.traces.get(trace_id).ok_or_else(|| TracingError::trace_not_found(trace_id))?;
                TracingView::Trace(TraceDetail { summary: trace.summary(), forest: SpanForest::build(&trace.spans) })
            },
            TracingQuery::RecentTraces { limit, service, errors_only } => TracingView::Traces(
                self.order
                    .iter()
                    .rev()
                    .filter_map(|id| self.traces.get(id))
                    .filter(|t| !errors_only || t.error_count() > 0)
                    .filter(|t| service.as_ref().map_or(true, |s| t.spans.iter().any(|span| &span.service == s)))
                    .take(*limit)
                    .map(Trace::summary)
                    .collect(),
            ),
            TracingQuery::ServiceStats => TracingView::Services(self.service_stats().into_values().collect()),
            TracingQuery::RecentOperations { limit } => TracingView::Operations(self.log.recent(*limit)),
        };
        Ok(view)
    }

    #[allow(clippy::cast_precision_loss)]
    fn snapshot(&self) -> MetricsSnapshot {
        let span_rate = self.ingested.rate(self.now);
        let retained_spans: usize = self.traces.values().map(|t| t.spans.len()).sum();

        let services = self.service_stats();
        let domain = TracingMetrics {
            traces_retained: self.traces.len() as u64,
            traces_active: self.traces.values().filter(|t| !t.sealed).count() as u64,
            traces_sealed: self.traces_sealed,
            traces_evicted: self.traces_evicted,
            error_traces: self.traces.values().filter(|t| t.error_count() > 0).count() as u64,
            spans_ingested: self.spans_ingested,
            spans_dropped: self.spans_dropped,
            services,
        };

        MetricsSnapshot::from_log(ComponentKind::TracingBackend, &self.log, self.now)
            .with_count("traces", domain.traces_retained)
            .with_count("spans", retained_spans as u64)
            .with_count("services", domain.services.len() as u64)
            .with_utilization("ingest", stats::utilization(span_rate, self.config.ingest_capacity))
            .with_domain(DomainMetrics::Tracing(domain))
    }
}

impl RoutingEngine for TracerEngine {
    fn kind(&self) -> ComponentKind {
        ComponentKind::TracingBackend
    }

    fn reconfigure(&mut self, config: &ComponentConfig) -> EmptyResult {
        let config = expect_variant!(config, ComponentConfig::TracingBackend, "tracing config")?;
        self.config = config.clone();
        self.evict();
        Ok(())
    }

    fn advance(&mut self, now: SimTime) -> EmptyResult {
        if now < self.now {
            return Ok(());
        }
        for at in self.load.due(now, self.config.traces_per_sec) {
            self.now = at;
            self.generate_trace();
        }
        self.now = now;
        self.seal();
        Ok(())
    }

    fn execute(&mut self, request: &OperationRequest) -> anyhow::Result<OperationResult> {
        let request = expect_variant!(request, OperationRequest::Tracing, "tracing request")?;
        let done = self.apply(request)?;
        Ok(OperationResult { latency_ms: done.latency_ms, detail: ResponseDetail::Tracing(done.value) })
    }

    fn query(&self, query: &DomainQuery) -> anyhow::Result<DomainView> {
        match query {
            DomainQuery::Tracing(q) => Ok(DomainView::Tracing(self.tracing_query(q)?)),
            other => Err(EngineError::unsupported_query(&format!("{other:?}"))),
        }
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.snapshot()
    }
}

#[cfg(test)]
mod tests;
