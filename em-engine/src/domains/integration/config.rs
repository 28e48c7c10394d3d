use std::collections::HashSet;

use derive_setters::Setters;
use serde::{
    Deserialize,
    Serialize,
};
use tracing::warn;

use crate::config::sanitize_f64;

/// Flow executions per second the worker pool can sustain.
pub const DEFAULT_WORKER_CAPACITY: f64 = 50.0;

/// Integration platform node config.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Setters)]
#[serde(default, rename_all = "camelCase")]
pub struct IntegrationConfig {
    /// Flows to deploy; empty and duplicate names are dropped.
    pub flows: Vec<FlowConfig>,

    /// Synthetic executions per second, spread uniformly over the flows.
    pub executions_per_sec: f64,
    /// Executions per second the worker utilization is measured against.
    pub worker_capacity: f64,
    /// Overrides the node's id-derived RNG seed.
    pub seed: Option<u64>,
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            flows: vec![FlowConfig::default()],
            executions_per_sec: 2.0,
            worker_capacity: DEFAULT_WORKER_CAPACITY,
            seed: None,
        }
    }
}

impl IntegrationConfig {
    pub(crate) fn normalize(&mut self) {
        let defaults = Self::default();
        sanitize_f64(&mut self.executions_per_sec, 0.0, 10_000.0, defaults.executions_per_sec, "executionsPerSec");
        sanitize_f64(
            &mut self.worker_capacity,
            f64::MIN_POSITIVE,
            f64::MAX,
            defaults.worker_capacity,
            "workerCapacity",
        );

        let mut seen = HashSet::new();
        self.flows.retain(|f| {
            let keep = !f.name.trim().is_empty() && seen.insert(f.name.clone());
            if !keep {
                warn!(flow = %f.name, "dropping empty or duplicate flow name");
            }
            keep
        });
        for flow in &mut self.flows {
            normalize_processors(&mut flow.processors);
        }
    }
}

fn normalize_processors(processors: &mut [ProcessorConfig]) {
    for p in processors {
        sanitize_f64(&mut p.latency_ms, 0.0, 3_600_000.0, 1.0, "latencyMs");
        sanitize_f64(&mut p.failure_rate, 0.0, 1.0, 0.0, "failureRate");
        if p.name.is_empty() {
            p.name = p.kind.as_str().into();
        }
        for route in &mut p.routes {
            sanitize_f64(&mut route.weight, 0.0, f64::MAX, 1.0, "weight");
            normalize_processors(&mut route.processors);
        }
        normalize_processors(&mut p.processors);
    }
}

/// What triggers a flow.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// An HTTP listener.
    #[default]
    Http,
    /// A schedule.
    Scheduler,
    /// A queue subscription.
    Queue,
}

impl SourceKind {
    /// Time spent receiving the triggering event before the first processor runs.
    #[must_use]
    pub const fn latency_ms(self) -> f64 {
        match self {
            Self::Http => 2.0,
            Self::Scheduler => 0.0,
            Self::Queue => 5.0,
        }
    }
}

/// One flow: a source, processors run in order, and a target.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Setters)]
#[serde(default, rename_all = "camelCase")]
#[setters(into)]
pub struct FlowConfig {
    /// Flow name, unique per node.
    pub name: String,
    /// Trigger kind.
    pub source: SourceKind,
    /// Processors run in order.
    pub processors: Vec<ProcessorConfig>,
    /// System the flow delivers to.
    pub target: String,
    /// Cost of the final delivery.
    pub target_latency_ms: f64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            name: "orders-api".into(),
            source: SourceKind::Http,
            processors: vec![
                ProcessorConfig::new("validate-order", ProcessorKind::Validate, 1.5).failure_rate(0.02),
                ProcessorConfig::new("to-canonical", ProcessorKind::Transform, 3.0),
                ProcessorConfig::new("route-by-priority", ProcessorKind::Choice, 0.5).routes(vec![
                    ChoiceRoute::new("priority", 1.0, vec![ProcessorConfig::new(
                        "enrich-customer",
                        ProcessorKind::Enrich,
                        12.0,
                    )]),
                    ChoiceRoute::new("standard", 3.0, vec![ProcessorConfig::new(
                        "log-standard",
                        ProcessorKind::Logger,
                        0.2,
                    )]),
                ]),
                ProcessorConfig::new("crm-sync", ProcessorKind::Try, 0.0).processors(vec![ProcessorConfig::new(
                    "push-crm",
                    ProcessorKind::Transform,
                    25.0,
                )
                .failure_rate(0.1)]),
                ProcessorConfig::new("audit", ProcessorKind::Async, 0.0)
                    .processors(vec![ProcessorConfig::new("audit-log", ProcessorKind::Logger, 4.0)]),
            ],
            target: "orders-db".into(),
            target_latency_ms: 8.0,
        }
    }
}

/// Processor types.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessorKind {
    /// Reshape the payload.
    #[default]
    Transform,
    /// Reject invalid payloads.
    Validate,
    /// Drop payloads that don't match.
    Filter,
    /// Call out for extra data.
    Enrich,
    /// Write a log line.
    Logger,
    /// Pick one weighted route.
    Choice,
    /// Run nested processors, absorbing their failures.
    Try,
    /// Set a flow variable.
    SetVariable,
    /// Replace the payload.
    SetPayload,
    /// Run nested processors off the main path.
    Async,
}

impl ProcessorKind {
    /// Wire name, e.g. `set-variable`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transform => "transform",
            Self::Validate => "validate",
            Self::Filter => "filter",
            Self::Enrich => "enrich",
            Self::Logger => "logger",
            Self::Choice => "choice",
            Self::Try => "try",
            Self::SetVariable => "set-variable",
            Self::SetPayload => "set-payload",
            Self::Async => "async",
        }
    }
}

/// One step of a flow.  `failure_rate` means "rejects" for `validate`, "drops" for `filter`, and
/// "raises an error" for everything else.  `routes` is only read by `choice`, `processors` only by
/// `try` and `async`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, Setters)]
#[serde(default, rename_all = "camelCase")]
pub struct ProcessorConfig {
    /// Processor name; defaults to the kind's name.
    #[setters(into)]
    pub name: String,

    /// Processor type.
    #[serde(rename = "type")]
    pub kind: ProcessorKind,
    /// Cost of one invocation.
    pub latency_ms: f64,
    /// Probability of rejecting, dropping or failing, depending on the kind.
    pub failure_rate: f64,
    /// Weighted routes of a `choice`.
    pub routes: Vec<ChoiceRoute>,
    /// Nested processors of a `try` or `async`.
    pub processors: Vec<ProcessorConfig>,
}

impl ProcessorConfig {
    /// Processor with no failures and no nested blocks.
    #[must_use]
    pub fn new(name: &str, kind: ProcessorKind, latency_ms: f64) -> Self {
        Self { name: name.into(), kind, latency_ms, ..Default::default() }
    }
}

/// One branch of a `choice`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChoiceRoute {
    /// Route name.
    pub name: String,
    /// Relative weight; routes are picked in proportion.
    pub weight: f64,
    /// Processors run when the route is picked.
    pub processors: Vec<ProcessorConfig>,
}

impl ChoiceRoute {
    /// Route `name` with `weight` and its processors.
    #[must_use]
    pub fn new(name: &str, weight: f64, processors: Vec<ProcessorConfig>) -> Self {
        Self { name: name.into(), weight, processors }
    }
}
