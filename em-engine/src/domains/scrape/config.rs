use std::collections::HashSet;

use derive_setters::Setters;
use serde::{
    Deserialize,
    Serialize,
};
use tracing::warn;

use crate::config::sanitize_f64;

/// Samples per second one scraper instance can ingest.
pub const DEFAULT_INGESTION_CAPACITY: f64 = 100_000.0;

/// Width of the window the ingestion rate is measured over; longer than the default throughput
/// window because scrapes are sparse.
pub const INGESTION_WINDOW_SECS: i64 = 60;

/// Metrics scraper node config.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Setters)]
#[serde(default, rename_all = "camelCase")]
pub struct ScrapeConfig {
    /// Targets to scrape; empty and duplicate names are dropped.
    pub targets: Vec<TargetConfig>,
    /// Samples per second the ingestion utilization is measured against.
    pub ingestion_capacity: f64,
    /// Overrides the node's id-derived RNG seed.
    pub seed: Option<u64>,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            targets: vec![
                TargetConfig::new("node-exporter", "node", 1_200),
                TargetConfig::new("api-server", "api", 4_000).failure_rate(0.02),
            ],
            ingestion_capacity: DEFAULT_INGESTION_CAPACITY,
            seed: None,
        }
    }
}

impl ScrapeConfig {
    pub(crate) fn normalize(&mut self) {
        let defaults = Self::default();
        sanitize_f64(
            &mut self.ingestion_capacity,
            f64::MIN_POSITIVE,
            f64::MAX,
            defaults.ingestion_capacity,
            "ingestionCapacity",
        );

        let mut seen = HashSet::new();
        self.targets.retain(|t| {
            let keep = !t.name.trim().is_empty() && seen.insert(t.name.clone());
            if !keep {
                warn!(target_name = %t.name, "dropping empty or duplicate scrape target");
            }
            keep
        });
        let fallback = TargetConfig::default();
        for target in &mut self.targets {
            sanitize_f64(&mut target.failure_rate, 0.0, 1.0, fallback.failure_rate, "failureRate");
            sanitize_f64(&mut target.base_latency_ms, 0.0, 3_600_000.0, fallback.base_latency_ms, "baseLatencyMs");
            if target.interval_secs == 0 {
                target.interval_secs = fallback.interval_secs;
            }
            if target.timeout_ms == 0 {
                target.timeout_ms = fallback.timeout_ms;
            }
        }
    }
}

/// One scrape target.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Setters)]
#[serde(default, rename_all = "camelCase")]
pub struct TargetConfig {
    /// Target name, unique per node.
    #[setters(into)]
    pub name: String,

    /// Job label.
    #[setters(into)]
    pub job: String,
    /// Scrape interval.
    pub interval_secs: u64,

    /// Time series exposed by the target; each successful scrape ingests one sample per series.
    pub series: u64,
    /// Probability that a scrape fails outright.
    pub failure_rate: f64,
    /// Scrape latency before the per-series cost.
    pub base_latency_ms: f64,

    /// A scrape slower than this counts as failed.
    pub timeout_ms: u64,
}

impl TargetConfig {
    /// Target `name` in `job` exposing `series` time series.
    #[must_use]
    pub fn new(name: &str, job: &str, series: u64) -> Self {
        Self { name: name.into(), job: job.into(), series, ..Default::default() }
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            job: String::new(),
            interval_secs: 15,
            series: 500,
            failure_rate: 0.01,
            base_latency_ms: 20.0,
            timeout_ms: 10_000,
        }
    }
}
