//! Integration platform: message flows made of a source, a chain of processors and a target.
mod config;
mod flow;

use std::collections::BTreeMap;

use em_core::err_impl;
use em_core::prelude::*;
use em_core::stats;
use rand::rngs::StdRng;
use rand::Rng;
use serde::{
    Deserialize,
    Serialize,
};
use tracing::debug;

pub use self::config::*;
pub use self::flow::{
    FlowStatus,
    ProcessorStats,
    MAX_NESTING,
};
use self::flow::FlowRunner;
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

err_impl! {IntegrationError,
    #[error("flow not found: {0}")]
    FlowNotFound(String),
}

/// An explicit integration platform operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IntegrationRequest {
    /// Run one execution of a flow.
    RunFlow {
        /// Flow to run.
        flow: String,
    },
}

/// Result of an [`IntegrationRequest`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IntegrationResponse {
    /// How one execution ended.
    FlowCompleted {
        /// Flow that ran.
        flow: String,
        /// Execution outcome.
        status: FlowStatus,
        /// Processors that ran, in order.
        path: Vec<String>,
        /// Why the execution failed.
        error: Option<String>,
    },
}

/// Read-only integration platform queries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IntegrationQuery {
    /// Stats for every flow.
    Flows,
    /// Stats for one flow.
    Flow(String),
    /// The newest operation records.
    RecentOperations {
        /// At most this many records.
        limit: usize,
    },
}

/// One flow's execution history.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowStats {
    /// Flow name.
    pub name: String,
    /// What triggers the flow.
    pub source: SourceKind,
    /// System the flow delivers to.
    pub target: String,
    /// Executions so far.
    pub executions: u64,
    /// Executions that reached the target.
    pub succeeded: u64,
    /// Executions that raised an uncaught error.
    pub failed: u64,
    /// Executions dropped by a filter.
    pub filtered: u64,
    /// Mean execution latency.
    pub avg_latency_ms: f64,
    /// Error of the most recent failed execution.
    pub last_error: Option<String>,
    /// Per-processor counters, keyed by processor name.
    pub processors: BTreeMap<String, ProcessorStats>,

    #[serde(skip)]
    total_latency_ms: f64,
}

impl FlowStats {
    fn new(flow: &FlowConfig) -> Self {
        Self { name: flow.name.clone(), source: flow.source, target: flow.target.clone(), ..Default::default() }
    }

    #[allow(clippy::cast_precision_loss)]
    fn record(&mut self, status: FlowStatus, latency_ms: f64, error: Option<&str>) {
        self.executions += 1;
        match status {
            FlowStatus::Succeeded => self.succeeded += 1,
            FlowStatus::Failed => self.failed += 1,
            FlowStatus::Filtered => self.filtered += 1,
        }
        if let Some(err) = error {
            self.last_error = Some(err.into());
        }
        self.total_latency_ms += latency_ms;
        self.avg_latency_ms = self.total_latency_ms / self.executions as f64;
    }
}

/// Answer to an [`IntegrationQuery`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IntegrationView {
    /// Every flow.
    Flows(Vec<FlowStats>),
    /// One flow.
    Flow(FlowStats),
    /// Operation records.
    Operations(Vec<OperationRecord>),
}

/// Integration platform part of a node's metrics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationMetrics {
    /// Per-flow stats.
    pub flows: BTreeMap<String, FlowStats>,
    /// Executions across flows.
    pub executions: u64,
    /// Successful executions across flows.
    pub succeeded: u64,
    /// Failed executions across flows.
    pub failed: u64,
    /// Filtered executions across flows.
    pub filtered: u64,
}

/// Simulates one integration platform node.
pub struct IntegrationEngine {
    config: IntegrationConfig,
    flows: BTreeMap<String, FlowStats>,
    log: OperationLog,
    load: LoadGenerator,
    rng: StdRng,
    now: SimTime,
}

impl IntegrationEngine {
    /// Engine with the configured flows and no executions yet.
    #[must_use]
    pub fn new(config: IntegrationConfig, seed: u64) -> Self {
        let mut engine = Self {
            config: IntegrationConfig::default(),
            flows: BTreeMap::new(),
            log: OperationLog::default(),
            load: LoadGenerator::new(),
            rng: rng_from_seed(seed),
            now: 0,
        };
        engine.apply_config(config);
        engine
    }

    /// Stats for one flow.
    #[must_use]
    pub fn flow_stats(&self, flow: &str) -> Option<&FlowStats> {
        self.flows.get(flow)
    }

    /// Run one request at the current simulated time and log its outcome.
    pub fn apply(&mut self, request: &IntegrationRequest) -> anyhow::Result<Completed<IntegrationResponse>> {
        let IntegrationRequest::RunFlow { flow } = request;
        let outcome = self.run_flow(flow);

        // A flow that ran but failed took its full latency; log it as an error without the
        // rejection shortcut.
        if let Ok(done) = &outcome {
            if matches!(done.value, IntegrationResponse::FlowCompleted { status: FlowStatus::Failed, .. }) {
                let record = OperationRecord::error(self.now, OpKind::FlowRun, done.latency_ms).with_target(flow);
                self.log.append(record);
                return outcome;
            }
        }
        settle(&mut self.log, &OpContext::new(self.now, OpKind::FlowRun, flow), outcome)
    }

    fn run_flow(&mut self, name: &str) -> anyhow::Result<Completed<IntegrationResponse>> {
        let flow = self
            .config
            .flows
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| IntegrationError::flow_not_found(name))?;
        let stats = self.flows.entry(flow.name.clone()).or_insert_with(|| FlowStats::new(flow));

        let run = FlowRunner::new(&mut self.rng, &mut stats.processors).run(flow);
        stats.record(run.status, run.latency_ms, run.error.as_deref());
        if let Some(err) = &run.error {
            debug!(flow = name, %err, "flow execution failed");
        }

        Ok(Completed::new(
            run.latency_ms,
            IntegrationResponse::FlowCompleted {
                flow: name.into(),
                status: run.status,
                path: run.path,
                error: run.error,
            },
        ))
    }

    fn apply_config(&mut self, config: IntegrationConfig) {
        let mut flows = BTreeMap::new();
        for flow in &config.flows {
            let stats = match self.flows.remove(&flow.name) {
                Some(mut existing) => {
                    existing.source = flow.source;
                    existing.target.clone_from(&flow.target);
                    existing
                },
                None => FlowStats::new(flow),
            };
            flows.insert(flow.name.clone(), stats);
        }
        self.flows = flows;
        self.config = config;
    }

    fn synthetic_run(&mut self) {
        if self.config.flows.is_empty() {
            return;
        }
        let index = self.rng.gen_range(0..self.config.flows.len());
        let flow = self.config.flows[index].name.clone();
        let _ = self.apply(&IntegrationRequest::RunFlow { flow });
    }

    fn integration_query(&self, query: &IntegrationQuery) -> anyhow::Result<IntegrationView> {
        let view = match query {
            IntegrationQuery::Flows => IntegrationView::Flows(self.flows.values().cloned().collect()),
            IntegrationQuery::Flow(name) => {
                let flow = self.flows.get(name).cloned().ok_or_else(|| IntegrationError::flow_not_found(name))?;
                IntegrationView::Flow(flow)
            },
            IntegrationQuery::RecentOperations { limit } => IntegrationView::Operations(self.log.recent(*limit)),
        };
        Ok(view)
    }

    fn snapshot(&self) -> MetricsSnapshot {
        let mut domain = IntegrationMetrics { flows: self.flows.clone(), ..Default::default() };
        for stats in self.flows.values() {
            domain.executions += stats.executions;
            domain.succeeded += stats.succeeded;
            domain.failed += stats.failed;
            domain.filtered += stats.filtered;
        }

        let snapshot = MetricsSnapshot::from_log(ComponentKind::IntegrationPlatform, &self.log, self.now);
        let workers = stats::utilization(snapshot.operations.throughput, self.config.worker_capacity);
        let processors = self.config.flows.iter().map(|f| count_processors(&f.processors)).sum::<usize>();

        snapshot
            .with_count("flows", self.flows.len() as u64)
            .with_count("processors", processors as u64)
            .with_utilization("workers", workers)
            .with_domain(DomainMetrics::Integration(domain))
    }
}

fn count_processors(processors: &[ProcessorConfig]) -> usize {
    processors
        .iter()
        .map(|p| {
            1 + count_processors(&p.processors)
                + p.routes.iter().map(|r| count_processors(&r.processors)).sum::<usize>()
        })
        .sum()
}

impl RoutingEngine for IntegrationEngine {
    fn kind(&self) -> ComponentKind {
        ComponentKind::IntegrationPlatform
    }

    fn reconfigure(&mut self, config: &ComponentConfig) -> EmptyResult {
        let config = expect_variant!(config, ComponentConfig::IntegrationPlatform, "integration config")?;
        self.apply_config(config.clone());
        Ok(())
    }

    fn advance(&mut self, now: SimTime) -> EmptyResult {
        if now < self.now {
            return Ok(());
        }
        for at in self.load.due(now, self.config.executions_per_sec) {
            self.now = at;
            self.synthetic_run();
        }
        self.now = now;
        Ok(())
    }

    fn execute(&mut self, request: &OperationRequest) -> anyhow::Result<OperationResult> {
        let request = expect_variant!(request, OperationRequest::Integration, "integration request")?;
        let done = self.apply(request)?;
        Ok(OperationResult { latency_ms: done.latency_ms, detail: ResponseDetail::Integration(done.value) })
    }

    fn query(&self, query: &DomainQuery) -> anyhow::Result<DomainView> {
        match query {
            DomainQuery::Integration(q) => Ok(DomainView::Integration(self.integration_query(q)?)),
            other => Err(EngineError::unsupported_query(&format!("{other:?}"))),
        }
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.snapshot()
    }
}

#[cfg(test)]
mod tests;
