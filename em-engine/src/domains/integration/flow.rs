//! Walks one execution of a flow through its processors.
use std::collections::BTreeMap;

use rand::rngs::StdRng;
use serde::{
    Deserialize,
    Serialize,
};

use super::config::{
    FlowConfig,
    ProcessorConfig,
    ProcessorKind,
};
use crate::load::{
    chance,
    weighted_index,
};

/// Nesting limit for `choice`/`try`/`async` blocks.
pub const MAX_NESTING: usize = 32;

/// How a flow execution ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowStatus {
    /// Delivered to the target.
    Succeeded,
    /// An uncaught error stopped it.
    Failed,
    /// A filter dropped the payload.
    Filtered,
}

/// Counters for one processor.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorStats {
    /// Times the processor ran.
    pub invocations: u64,
    /// Times it rejected or failed.
    pub failures: u64,

    /// Failures of nested processors absorbed by this `try` block.
    pub caught: u64,
}

#[derive(Debug)]
enum Step {
    Continue,
    Filtered,
    Failed(String),
}

/// Result of one walk.  `path` lists the processors that ran, in order.
#[derive(Clone, Debug, PartialEq)]
pub struct FlowExecution {
    pub status: FlowStatus,
    pub latency_ms: f64,
    pub path: Vec<String>,
    pub error: Option<String>,
}

pub struct FlowRunner<'a> {
    rng: &'a mut StdRng,
    stats: &'a mut BTreeMap<String, ProcessorStats>,
    latency_ms: f64,
    path: Vec<String>,
}

impl<'a> FlowRunner<'a> {
    pub fn new(rng: &'a mut StdRng, stats: &'a mut BTreeMap<String, ProcessorStats>) -> Self {
        Self { rng, stats, latency_ms: 0.0, path: vec![] }
    }

    pub fn run(mut self, flow: &FlowConfig) -> FlowExecution {
        self.latency_ms = flow.source.latency_ms();
        let step = self.run_block(&flow.processors, 0);
        let (status, error) = match step {
            Step::Continue => {
                self.latency_ms += flow.target_latency_ms;
                (FlowStatus::Succeeded, None)
            },
            Step::Filtered => (FlowStatus::Filtered, None),
            Step::Failed(err) => (FlowStatus::Failed, Some(err)),
        };
        FlowExecution { status, latency_ms: self.latency_ms, path: self.path, error }
    }

    fn run_block(&mut self, processors: &[ProcessorConfig], depth: usize) -> Step {
        if depth > MAX_NESTING {
            return Step::Failed(format!("processors nested deeper than {MAX_NESTING}"));
        }
        for p in processors {
            match self.run_processor(p, depth) {
                Step::Continue => (),
                stop => return stop,
            }
        }
        Step::Continue
    }

    fn run_processor(&mut self, p: &ProcessorConfig, depth: usize) -> Step {
        self.stats.entry(p.name.clone()).or_default().invocations += 1;
        self.path.push(p.name.clone());
        self.latency_ms += p.latency_ms;

        let step = match p.kind {
            ProcessorKind::Filter => {
                if chance(self.rng, p.failure_rate) {
                    Step::Filtered
                } else {
                    Step::Continue
                }
            },
            ProcessorKind::Validate => self.maybe_fail(p, "validation failed"),
            ProcessorKind::Choice => {
                let weights: Vec<_> = p.routes.iter().map(|r| r.weight).collect();
                match weighted_index(self.rng, &weights) {
                    Some(i) => self.run_block(&p.routes[i].processors, depth + 1),
                    None => Step::Continue,
                }
            },
            ProcessorKind::Try => match self.run_block(&p.processors, depth + 1) {
                Step::Failed(_) => {
                    self.stats.entry(p.name.clone()).or_default().caught += 1;
                    Step::Continue
                },
                other => other,
            },
            ProcessorKind::Async => {
                // Off the critical path: neither its latency nor its outcome reaches the caller.
                let before = self.latency_ms;
                let _ = self.run_block(&p.processors, depth + 1);
                self.latency_ms = before;
                Step::Continue
            },
            ProcessorKind::Transform
            | ProcessorKind::Enrich
            | ProcessorKind::Logger
            | ProcessorKind::SetVariable
            | ProcessorKind::SetPayload => self.maybe_fail(p, "processor error"),
        };

        if matches!(step, Step::Failed(_)) && !matches!(p.kind, ProcessorKind::Choice | ProcessorKind::Try) {
            self.stats.entry(p.name.clone()).or_default().failures += 1;
        }
        step
    }

    fn maybe_fail(&mut self, p: &ProcessorConfig, what: &str) -> Step {
        if chance(self.rng, p.failure_rate) {
            Step::Failed(format!("{}: {what}", p.name))
        } else {
            Step::Continue
        }
    }
}
