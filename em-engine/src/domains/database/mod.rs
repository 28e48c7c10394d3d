//! Relational database: tables with row counts, a bounded connection pool, and a latency model
//! that grows with table size and pool pressure.
mod config;

use std::collections::{
    BTreeMap,
    VecDeque,
};

use em_core::err_impl;
use em_core::prelude::*;
use rand::rngs::StdRng;
use rand::Rng;
use serde::{
    Deserialize,
    Serialize,
};
use tracing::debug;

pub use self::config::*;
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
    REJECTED_LATENCY_MS,
};
use crate::errors::EngineError;
use crate::load::{
    chance,
    rng_from_seed,
    LoadGenerator,
};
use crate::metrics::{
    DomainMetrics,
    MetricsSnapshot,
};

/// How many slow queries are kept for the detail panel.
pub const SLOW_QUERY_HISTORY: usize = 100;

/// Per-row cost of scanning, and of writing.
const SCAN_MS_PER_ROW: f64 = 0.002;
const WRITE_MS_PER_ROW: f64 = 0.05;

/// Per-level cost of walking the index.
const INDEX_MS_PER_LEVEL: f64 = 0.05;

err_impl! {DatabaseError,
    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("too many connections: {0}")]
    ConnectionLimit(u32),
}

/// An explicit SQL statement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DatabaseRequest {
    /// `limit: None` is a full table scan.
    Select {
        /// Table to read.
        table: String,
        /// Rows to return at most.
        #[serde(default)]
        limit: Option<u64>,
    },
    /// Add rows.
    Insert {
        /// Table to write.
        table: String,
        /// Rows to insert.
        rows: u64,
    },
    /// Change rows in place.
    Update {
        /// Table to write.
        table: String,
        /// Rows to update; clamped to the table's row count.
        rows: u64,
    },
    /// Remove rows.
    Delete {
        /// Table to write.
        table: String,
        /// Rows to delete; clamped to the table's row count.
        rows: u64,
    },
}

impl DatabaseRequest {
    /// Operation kind recorded in the log for this statement.
    #[must_use]
    pub const fn op_kind(&self) -> OpKind {
        match self {
            Self::Select { .. } => OpKind::Select,
            Self::Insert { .. } => OpKind::Insert,
            Self::Update { .. } => OpKind::Update,
            Self::Delete { .. } => OpKind::Delete,
        }
    }

    /// Table the statement runs against.
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::Select { table, .. }
            | Self::Insert { table, .. }
            | Self::Update { table, .. }
            | Self::Delete { table, .. } => table,
        }
    }

    const fn base_latency_ms(&self) -> f64 {
        match self {
            Self::Select { .. } => 0.5,
            Self::Insert { .. } => 1.0,
            Self::Update { .. } => 1.5,
            Self::Delete { .. } => 1.2,
        }
    }
}

/// Result of a [`DatabaseRequest`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DatabaseResponse {
    /// Rows touched by the statement.
    Rows {
        /// Table the statement ran against.
        table: String,
        /// Rows read or written.
        affected: u64,
    },
}

/// Read-only database queries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DatabaseQuery {
    /// Stats for every table.
    Tables,
    /// Stats for one table.
    Table(String),
    /// The newest slow queries.
    SlowQueries {
        /// At most this many entries.
        limit: usize,
    },
    /// The newest operation records.
    RecentOperations {
        /// At most this many records.
        limit: usize,
    },
}

/// One table's size and traffic.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableStats {
    /// Table name.
    pub name: String,
    /// Current row count.
    pub rows: u64,
    /// Select statements run.
    pub reads: u64,
    /// Insert, update and delete statements run.
    pub writes: u64,
    /// Rows returned by selects.
    pub rows_read: u64,
    /// Rows inserted, updated or deleted.
    pub rows_written: u64,
}

/// A statement that took longer than the slow query threshold.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlowQuery {
    /// When the statement ran.
    pub at: SimTime,
    /// Table it ran against.
    pub table: String,
    /// Statement kind.
    pub kind: OpKind,
    /// Synthetic latency.
    pub latency_ms: f64,
}

/// Answer to a [`DatabaseQuery`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DatabaseView {
    /// Every table.
    Tables(Vec<TableStats>),
    /// One table.
    Table(TableStats),
    /// Slow query log entries.
    SlowQueries(Vec<SlowQuery>),
    /// Operation records.
    Operations(Vec<OperationRecord>),
}

/// Database part of a node's metrics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseMetrics {
    /// Engine flavour from the config.
    pub engine: String,
    /// Per-table stats.
    pub tables: BTreeMap<String, TableStats>,
    /// Connections checked out right now.
    pub active_connections: u32,
    /// Most connections ever checked out at once.
    pub peak_connections: u32,
    /// Pool size.
    pub max_connections: u32,
    /// Statements refused because the pool was full.
    pub rejected_connections: u64,
    /// Statements over the slow query threshold so far.
    pub slow_queries: u64,
}

/// Simulates one relational database node.
pub struct DatabaseEngine {
    config: DatabaseConfig,
    tables: BTreeMap<String, TableStats>,

    /// Release times of the connections currently checked out.
    connections: Vec<SimTime>,
    peak_connections: u32,
    rejected_connections: u64,
    slow_queries: u64,
    slow_log: VecDeque<SlowQuery>,
    log: OperationLog,
    load: LoadGenerator,
    rng: StdRng,
    now: SimTime,
}

impl DatabaseEngine {
    /// Engine with the configured tables and an idle pool.
    #[must_use]
    pub fn new(config: DatabaseConfig, seed: u64) -> Self {
        let mut engine = Self {
            config: DatabaseConfig::default(),
            tables: BTreeMap::new(),
            connections: vec![],
            peak_connections: 0,
            rejected_connections: 0,
            slow_queries: 0,
            slow_log: VecDeque::new(),
            log: OperationLog::default(),
            load: LoadGenerator::new(),
            rng: rng_from_seed(seed),
            now: 0,
        };
        engine.apply_config(config);
        engine
    }

    /// Stats for one table.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&TableStats> {
        self.tables.get(name)
    }

    /// Connections still checked out at the engine's current time.
    #[must_use]
    pub fn active_connections(&self) -> u32 {
        let now = self.now;
        u32::try_from(self.connections.iter().filter(|&&release| release > now).count()).unwrap_or(u32::MAX)
    }

    /// Run one statement at the current simulated time and log its outcome.
    pub fn apply(&mut self, request: &DatabaseRequest) -> anyhow::Result<Completed<DatabaseResponse>> {
        let outcome = self.run(request);
        settle(&mut self.log, &OpContext::new(self.now, request.op_kind(), request.table()), outcome)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn run(&mut self, request: &DatabaseRequest) -> anyhow::Result<Completed<DatabaseResponse>> {
        let now = self.now;
        let name = request.table();
        if !self.tables.contains_key(name) {
            return Err(DatabaseError::table_not_found(name));
        }

        self.connections.retain(|&release| release > now);
        let active = self.active_connections();
        if active >= self.config.max_connections {
            self.rejected_connections += 1;
            return Err(DatabaseError::connection_limit(&self.config.max_connections));
        }

        let Some(table) = self.tables.get_mut(name) else {
            return Err(DatabaseError::table_not_found(name));
        };
        let index_depth = (table.rows.saturating_add(1) as f64).log2();
        let (affected, row_cost) = match request {
            DatabaseRequest::Select { limit, .. } => {
                let scanned = limit.map_or(table.rows, |l| l.min(table.rows));
                table.reads += 1;
                table.rows_read = table.rows_read.saturating_add(scanned);
                let cost =
                    if limit.is_none() { scanned as f64 * SCAN_MS_PER_ROW } else { index_depth * INDEX_MS_PER_LEVEL };
                (scanned, cost + scanned as f64 * SCAN_MS_PER_ROW * 0.1)
            },
            DatabaseRequest::Insert { rows, .. } => {
                table.rows = table.rows.saturating_add(*rows);
                (*rows, *rows as f64 * WRITE_MS_PER_ROW + index_depth * INDEX_MS_PER_LEVEL)
            },
            DatabaseRequest::Update { rows, .. } => {
                let n = (*rows).min(table.rows);
                (n, n as f64 * WRITE_MS_PER_ROW + index_depth * INDEX_MS_PER_LEVEL)
            },
            DatabaseRequest::Delete { rows, .. } => {
                let n = (*rows).min(table.rows);
                table.rows -= n;
                (n, n as f64 * WRITE_MS_PER_ROW + index_depth * INDEX_MS_PER_LEVEL)
            },
        };
        if !matches!(request, DatabaseRequest::Select { .. }) {
            table.writes += 1;
            table.rows_written = table.rows_written.saturating_add(affected);
        }

        // Contention grows quadratically as the pool fills.
        let pressure = f64::from(active) / f64::from(self.config.max_connections);
        let latency = (request.base_latency_ms() + row_cost) * (1.0 + 4.0 * pressure * pressure);

        self.connections.push(now + latency.ceil() as SimTime);
        self.peak_connections = self.peak_connections.max(active + 1);
        if latency > self.config.slow_query_threshold_ms {
            debug!(table = name, latency_ms = latency, "slow query");
            self.slow_queries += 1;
            self.slow_log.push_back(SlowQuery {
                at: now,
                table: name.into(),
                kind: request.op_kind(),
                latency_ms: latency,
            });
            if self.slow_log.len() > SLOW_QUERY_HISTORY {
                self.slow_log.pop_front();
            }
        }

        Ok(Completed::new(latency, DatabaseResponse::Rows { table: name.into(), affected }))
    }

    fn apply_config(&mut self, config: DatabaseConfig) {
        let mut tables = BTreeMap::new();
        for table in &config.tables {
            let stats = self
                .tables
                .remove(&table.name)
                .unwrap_or_else(|| TableStats { name: table.name.clone(), rows: table.rows, ..Default::default() });
            tables.insert(table.name.clone(), stats);
        }
        self.tables = tables;
        self.config = config;
    }

    fn synthetic_query(&mut self) {
        if self.tables.is_empty() {
            return;
        }
        let index = self.rng.gen_range(0..self.tables.len());
        let Some(table) = self.tables.keys().nth(index).cloned() else {
            return;
        };

        let request = if chance(&mut self.rng, self.config.read_ratio) {
            // An occasional unindexed query.
            let limit = if chance(&mut self.rng, 0.02) { None } else { Some(self.rng.gen_range(1..=50)) };
            DatabaseRequest::Select { table, limit }
        } else {
            let rows = self.rng.gen_range(1..=5);
            match self.rng.gen_range(0..10) {
                0..=5 => DatabaseRequest::Insert { table, rows },
                6..=8 => DatabaseRequest::Update { table, rows },
                _ => DatabaseRequest::Delete { table, rows },
            }
        };

        if chance(&mut self.rng, self.config.error_rate) {
            let record = OperationRecord::error(self.now, request.op_kind(), REJECTED_LATENCY_MS);
            self.log.append(record.with_target(request.table()));
            return;
        }
        let _ = self.apply(&request);
    }

    fn database_query(&self, query: &DatabaseQuery) -> anyhow::Result<DatabaseView> {
        let view = match query {
            DatabaseQuery::Tables => DatabaseView::Tables(self.tables.values().cloned().collect()),
            DatabaseQuery::Table(name) => {
                DatabaseView::Table(self.tables.get(name).cloned().ok_or_else(|| DatabaseError::table_not_found(name))?)
            },
            DatabaseQuery::SlowQueries { limit } => {
                DatabaseView::SlowQueries(self.slow_log.iter().rev().take(*limit).cloned().collect())
            },
            DatabaseQuery::RecentOperations { limit } => DatabaseView::Operations(self.log.recent(*limit)),
        };
        Ok(view)
    }

    fn snapshot(&self) -> MetricsSnapshot {
        let active = self.active_connections();
        let domain = DatabaseMetrics {
            engine: self.config.engine.clone(),
            tables: self.tables.clone(),
            active_connections: active,
            peak_connections: self.peak_connections,
            max_connections: self.config.max_connections,
            rejected_connections: self.rejected_connections,
            slow_queries: self.slow_queries,
        };

        MetricsSnapshot::from_log(ComponentKind::RelationalDatabase, &self.log, self.now)
            .with_count("tables", self.tables.len() as u64)
            .with_count("rows", self.tables.values().map(|t| t.rows).fold(0, u64::saturating_add))
            .with_count("activeConnections", u64::from(active))
            .with_utilization(
                "connections",
                em_core::stats::utilization(f64::from(active), f64::from(self.config.max_connections)),
            )
            .with_domain(DomainMetrics::Database(domain))
    }
}

impl RoutingEngine for DatabaseEngine {
    fn kind(&self) -> ComponentKind {
        ComponentKind::RelationalDatabase
    }

    fn reconfigure(&mut self, config: &ComponentConfig) -> EmptyResult {
        let config = expect_variant!(config, ComponentConfig::RelationalDatabase, "database config")?;
        self.apply_config(config.clone());
        Ok(())
    }

    fn advance(&mut self, now: SimTime) -> EmptyResult {
        if now < self.now {
            return Ok(());
        }
        for at in self.load.due(now, self.config.queries_per_sec) {
            self.now = at;
            self.synthetic_query();
        }
        self.now = now;
        self.connections.retain(|&release| release > now);
        Ok(())
    }

    fn execute(&mut self, request: &OperationRequest) -> anyhow::Result<OperationResult> {
        let request = expect_variant!(request, OperationRequest::Database, "database request")?;
        let done = self.apply(request)?;
        Ok(OperationResult { latency_ms: done.latency_ms, detail: ResponseDetail::Database(done.value) })
    }

    fn query(&self, query: &DomainQuery) -> anyhow::Result<DomainView> {
        match query {
            DomainQuery::Database(q) => Ok(DomainView::Database(self.database_query(q)?)),
            other => Err(EngineError::unsupported_query(&format!("{other:?}"))),
        }
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.snapshot()
    }
}

#[cfg(test)]
mod tests;
