//! Synthetic traces: a walk over the configured service call graph.
use std::collections::BTreeMap;

use em_core::time::SimTime;
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{
    Distribution,
    Normal,
};

use super::config::{
    ServiceConfig,
    TracerConfig,
};
use super::model::{
    Span,
    SpanStatus,
};
use crate::load::{
    chance,
    hex_id,
};

/// Fan-out guard: a generated trace never has more spans than this.
pub const MAX_SPANS_PER_TRACE: usize = 256;

/// Chance that a failing downstream call also fails its caller.
const ERROR_PROPAGATION: f64 = 0.5;

pub(super) struct TraceGenerator<'a> {
    config: &'a TracerConfig,
    rng: &'a mut StdRng,
    trace_id: String,
    spans: Vec<Span>,
}

impl<'a> TraceGenerator<'a> {
    pub(super) fn new(config: &'a TracerConfig, rng: &'a mut StdRng) -> Self {
        let trace_id = format!("{}{}", hex_id(rng), hex_id(rng));
        Self { config, rng, trace_id, spans: vec![] }
    }

    /// Generate one trace starting at `start`.  Returns no spans if the call graph is empty.
    pub(super) fn generate(mut self, start: SimTime) -> Vec<Span> {
        let entry = match &self.config.entry_service {
            Some(name) => self.service(name),
            None => self.config.services.first(),
        };
        if let Some(entry) = entry {
            self.emit(entry, None, start, 0);
        }
        self.spans
    }

    fn service(&self, name: &str) -> Option<&'a ServiceConfig> {
        self.config.services.iter().find(|s| s.name == name)
    }

    /// Emit the span for one call of `service` plus its downstream calls; returns when it ended
    /// and whether it failed.  Depth is bounded by `max_depth`.
    fn emit(&mut self, service: &ServiceConfig, parent: Option<&str>, start: SimTime, depth: u32) -> (SimTime, bool) {
        let span_id = hex_id(self.rng);
        let op_index = self.rng.gen_range(0..service.operations.len().max(1));
        let operation = service.operations.get(op_index).cloned().unwrap_or_default();
        let self_time = self.self_time(service);
        let before = self_time / 2;

        // Reserve our slot before the children so the parent appears first.
        let slot = self.spans.len();
        self.spans.push(Span::default());

        let mut cursor = start + before;
        let mut child_failed = false;
        if depth + 1 < self.config.max_depth {
            for callee in &service.calls {
                if self.spans.len() >= MAX_SPANS_PER_TRACE {
                    break;
                }
                let Some(callee) = self.service(callee) else {
                    continue;
                };
                let (end, failed) = self.emit(callee, Some(span_id.as_str()), cursor + 1, depth + 1);
                cursor = end;
                child_failed |= failed;
            }
        }
        let end = cursor + (self_time - before).max(1);

        let failed = chance(self.rng, service.error_rate) || (child_failed && chance(self.rng, ERROR_PROPAGATION));
        let mut attributes = BTreeMap::new();
        attributes.insert("depth".to_owned(), depth.to_string());
        self.spans[slot] = Span {
            trace_id: self.trace_id.clone(),
            span_id,
            parent_span_id: parent.map(Into::into),
            service: service.name.clone(),
            operation,
            start_time: start,
            end_time: end,
            status: if failed { SpanStatus::Error } else { SpanStatus::Ok },
            attributes,
        };
        (end, failed)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn self_time(&mut self, service: &ServiceConfig) -> SimTime {
        let mean = service.latency_ms.max(0.0);
        let sample = Normal::new(mean, mean * service.jitter).map_or(mean, |dist| dist.sample(&mut *self.rng));
        (sample.max(1.0)).round() as SimTime
    }
}
