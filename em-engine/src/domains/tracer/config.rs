use std::collections::HashSet;

use derive_setters::Setters;
use serde::{
    Deserialize,
    Serialize,
};
use tracing::warn;

use crate::config::sanitize_f64;

/// Traces retained when the config gives 0.
pub const DEFAULT_MAX_TRACES: usize = 500;
/// Upper bound on `maxDepth`.
pub const MAX_CALL_DEPTH: u32 = 16;

/// Spans per second the backend is sized to ingest.
pub const DEFAULT_INGEST_CAPACITY: f64 = 10_000.0;

/// Tracing backend node config.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Setters)]
#[serde(default, rename_all = "camelCase")]
pub struct TracerConfig {
    /// The simulated service call graph.  Synthetic traces start at `entry_service` (or the first
    /// service) and follow `calls` edges.
    pub services: Vec<ServiceConfig>,
    /// Service synthetic traces start at.
    pub entry_service: Option<String>,
    /// Synthetic trace rate.
    pub traces_per_sec: f64,
    /// Traces retained before the oldest is evicted.
    pub max_traces: usize,
    /// Deepest call chain a synthetic trace follows.
    pub max_depth: u32,
    /// Spans per second the ingest utilization is measured against.
    pub ingest_capacity: f64,
    /// Overrides the node's id-derived RNG seed.
    pub seed: Option<u64>,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            services: vec![
                ServiceConfig::new("frontend", &["GET /", "GET /product"], 12.0)
                    .calls(vec!["catalog".into(), "checkout".into()]),
                ServiceConfig::new("catalog", &["ListProducts", "GetProduct"], 8.0).calls(vec!["postgres".into()]),
                ServiceConfig::new("checkout", &["PlaceOrder"], 20.0)
                    .calls(vec!["payments".into(), "postgres".into()])
                    .error_rate(0.02),
                ServiceConfig::new("payments", &["Charge"], 35.0).error_rate(0.01),
                ServiceConfig::new("postgres", &["SELECT", "INSERT"], 3.0),
            ],
            entry_service: None,
            traces_per_sec: 2.0,
            max_traces: DEFAULT_MAX_TRACES,
            max_depth: 8,
            ingest_capacity: DEFAULT_INGEST_CAPACITY,
            seed: None,
        }
    }
}

impl TracerConfig {
    pub(crate) fn normalize(&mut self) {
        let defaults = Self::default();
        sanitize_f64(&mut self.traces_per_sec, 0.0, 10_000.0, defaults.traces_per_sec, "tracesPerSec");
        sanitize_f64(
            &mut self.ingest_capacity,
            f64::MIN_POSITIVE,
            f64::MAX,
            defaults.ingest_capacity,
            "ingestCapacity",
        );
        if self.max_traces == 0 {
            self.max_traces = defaults.max_traces;
        }
        if self.max_depth == 0 || self.max_depth > MAX_CALL_DEPTH {
            warn!(max_depth = self.max_depth, "maxDepth out of range; clamping");
            self.max_depth = self.max_depth.clamp(1, MAX_CALL_DEPTH);
        }

        let mut seen = HashSet::new();
        self.services.retain(|s| !s.name.is_empty() && seen.insert(s.name.clone()));
        for service in &mut self.services {
            sanitize_f64(&mut service.latency_ms, 0.0, 3_600_000.0, 10.0, "latencyMs");
            sanitize_f64(&mut service.jitter, 0.0, 10.0, 0.25, "jitter");
            sanitize_f64(&mut service.error_rate, 0.0, 1.0, 0.0, "errorRate");
            if service.operations.is_empty() {
                service.operations.push("handle".into());
            }
        }
        if let Some(entry) = &self.entry_service {
            if !self.services.iter().any(|s| &s.name == entry) {
                warn!(%entry, "entry service is not in the call graph; using the first service");
                self.entry_service = None;
            }
        }
    }
}

/// One service in the simulated call graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Setters)]
#[serde(default, rename_all = "camelCase")]
pub struct ServiceConfig {
    /// Service name, unique per node.
    pub name: String,
    /// Operation names spans are drawn from.
    pub operations: Vec<String>,

    /// Mean self time of one span.
    pub latency_ms: f64,

    /// Relative spread of the self time (standard deviation over mean).
    pub jitter: f64,
    /// Probability that a span of this service fails.
    pub error_rate: f64,

    /// Downstream services called, in order, from every span of this service.
    pub calls: Vec<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            operations: vec![],
            latency_ms: 10.0,
            jitter: 0.25,
            error_rate: 0.0,
            calls: vec![],
        }
    }
}

impl ServiceConfig {
    /// Service `name` with the given operations and mean self time.
    #[must_use]
    pub fn new(name: &str, operations: &[&str], latency_ms: f64) -> Self {
        Self {
            name: name.into(),
            operations: operations.iter().map(|op| (*op).into()).collect(),
            latency_ms,
            ..Default::default()
        }
    }
}
