use std::collections::{
    BTreeMap,
    HashSet,
};

use em_core::time::SimTime;
use serde::{
    Deserialize,
    Serialize,
};

/// Outcome of a span.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    /// Completed normally.
    #[default]
    Ok,
    /// Failed.
    Error,
}

/// One timed unit of work.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Span {
    /// Trace the span belongs to.
    pub trace_id: String,
    /// Span id, unique within the trace.
    pub span_id: String,
    /// Calling span, if any.
    pub parent_span_id: Option<String>,
    /// Service that did the work.
    pub service: String,
    /// Operation name.
    pub operation: String,
    /// Start, simulated time.
    pub start_time: SimTime,
    /// End, simulated time.
    pub end_time: SimTime,
    /// Span outcome.
    pub status: SpanStatus,
    /// Free-form tags.
    pub attributes: BTreeMap<String, String>,
}

impl Span {
    /// Span length; 0 if it ends before it starts.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn duration_ms(&self) -> f64 {
        (self.end_time - self.start_time).max(0) as f64
    }

    /// Whether the span failed.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status == SpanStatus::Error
    }
}

/// All spans seen so far for one trace id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    /// Trace id.
    pub trace_id: String,
    /// Spans in arrival order.
    pub spans: Vec<Span>,
    /// Earliest span start.
    pub started_at: SimTime,
    /// Latest span end.
    pub ended_at: SimTime,

    /// Set once simulated time reaches the end of the last span.
    pub sealed: bool,

    /// Whether the trace has been counted as sealed; late spans reopen it without un-counting it.
    #[serde(skip)]
    pub(super) counted: bool,
}

impl Trace {
    pub(super) fn new(trace_id: &str) -> Self {
        Self {
            trace_id: trace_id.into(),
            spans: vec![],
            started_at: SimTime::MAX,
            ended_at: SimTime::MIN,
            sealed: false,
            counted: false,
        }
    }

    pub(super) fn push(&mut self, span: Span) {
        self.started_at = self.started_at.min(span.start_time);
        self.ended_at = self.ended_at.max(span.end_time);
        self.sealed = false;
        self.spans.push(span);
    }

    /// The earliest span without a parent in this trace, if any.
    #[must_use]
    pub fn root_span(&self) -> Option<&Span> {
        let ids: HashSet<&str> = self.spans.iter().map(|s| s.span_id.as_str()).collect();
        self.spans
            .iter()
            .filter(|s| s.parent_span_id.as_deref().map_or(true, |p| !ids.contains(p)))
            .min_by_key(|s| s.start_time)
    }

    /// Error spans in the trace.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.spans.iter().filter(|s| s.is_error()).count()
    }

    /// Headline numbers for trace lists.
    #[must_use]
    pub fn summary(&self) -> TraceSummary {
        let root = self.root_span();
        TraceSummary {
            trace_id: self.trace_id.clone(),
            root_service: root.map(|s| s.service.clone()).unwrap_or_default(),
            root_operation: root.map(|s| s.operation.clone()).unwrap_or_default(),
            span_count: self.spans.len(),
            error_count: self.error_count(),
            started_at: self.started_at,
            duration_ms: self.ended_at.saturating_sub(self.started_at).max(0),
            sealed: self.sealed,
        }
    }
}

/// Headline numbers of one trace.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceSummary {
    /// Trace id.
    pub trace_id: String,
    /// Service of the root span.
    pub root_service: String,
    /// Operation of the root span.
    pub root_operation: String,
    /// Spans in the trace.
    pub span_count: usize,
    /// Error spans in the trace.
    pub error_count: usize,
    /// Earliest span start.
    pub started_at: SimTime,
    /// From the earliest start to the latest end.
    pub duration_ms: SimTime,
    /// Whether simulated time has passed the end of the last span.
    pub sealed: bool,
}
