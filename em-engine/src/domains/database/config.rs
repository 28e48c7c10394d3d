use std::collections::HashSet;

use derive_setters::Setters;
use serde::{
    Deserialize,
    Serialize,
};
use tracing::warn;

use crate::config::sanitize_f64;

/// Pool size when the config gives 0.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 100;
/// Latency above which a statement lands in the slow query log.
pub const DEFAULT_SLOW_QUERY_MS: f64 = 100.0;

/// Relational database node config.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Setters)]
#[serde(default, rename_all = "camelCase")]
pub struct DatabaseConfig {
    /// Engine flavour shown in the panel (`postgres`, `mysql`, ...).  Doesn't change behaviour.
    #[setters(into)]
    pub engine: String,
    /// Tables to create; empty and duplicate names are dropped.
    pub tables: Vec<TableConfig>,
    /// Synthetic statement rate.
    pub queries_per_sec: f64,
    /// Fraction of synthetic statements that are selects.
    pub read_ratio: f64,
    /// Fraction of synthetic statements that fail.
    pub error_rate: f64,
    /// Connection pool size.
    pub max_connections: u32,
    /// Slow query threshold.
    pub slow_query_threshold_ms: f64,
    /// Overrides the node's id-derived RNG seed.
    pub seed: Option<u64>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            engine: "postgres".into(),
            tables: vec![TableConfig::new("users", 50_000), TableConfig::new("orders", 1_200_000)],
            queries_per_sec: 20.0,
            read_ratio: 0.8,
            error_rate: 0.001,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            slow_query_threshold_ms: DEFAULT_SLOW_QUERY_MS,
            seed: None,
        }
    }
}

impl DatabaseConfig {
    pub(crate) fn normalize(&mut self) {
        let defaults = Self::default();
        sanitize_f64(&mut self.queries_per_sec, 0.0, 100_000.0, defaults.queries_per_sec, "queriesPerSec");
        sanitize_f64(&mut self.read_ratio, 0.0, 1.0, defaults.read_ratio, "readRatio");
        sanitize_f64(&mut self.error_rate, 0.0, 1.0, defaults.error_rate, "errorRate");
        sanitize_f64(
            &mut self.slow_query_threshold_ms,
            f64::MIN_POSITIVE,
            f64::MAX,
            defaults.slow_query_threshold_ms,
            "slowQueryThresholdMs",
        );
        if self.max_connections == 0 {
            self.max_connections = defaults.max_connections;
        }

        let mut seen = HashSet::new();
        self.tables.retain(|t| {
            let keep = !t.name.trim().is_empty() && seen.insert(t.name.clone());
            if !keep {
                warn!(table = %t.name, "dropping empty or duplicate table name");
            }
            keep
        });
    }
}

/// One table.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TableConfig {
    /// Table name, unique per node.
    pub name: String,

    /// Initial row count; only read when the table is first created.
    pub rows: u64,
}

impl TableConfig {
    /// Table `name` starting with `rows` rows.
    #[must_use]
    pub fn new(name: &str, rows: u64) -> Self {
        Self { name: name.into(), rows }
    }
}
