//! Metrics scraper: polls each configured target on its interval and tracks target health and
//! sample ingestion.
mod config;

use std::collections::BTreeMap;

use em_core::err_impl;
use em_core::prelude::*;
use em_core::stats::{
    self,
    SlidingWindowCounter,
};
use em_core::time::secs;
use rand::rngs::StdRng;
use rand::Rng;
use serde::{
    Deserialize,
    Serialize,
};
use tracing::{
    debug,
    info,
};

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
};
use crate::errors::EngineError;
use crate::load::{
    chance,
    rng_from_seed,
    MAX_OPS_PER_TICK,
};
use crate::metrics::{
    DomainMetrics,
    MetricsSnapshot,
};

/// Per-series cost of a scrape on top of the target's base latency.
const MS_PER_SERIES: f64 = 0.01;

err_impl! {ScrapeError,
    #[error("scrape target not found: {0}")]
    TargetNotFound(String),
}

/// Outcome of the latest scrape of a target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    /// Not scraped yet.
    #[default]
    Unknown,
    /// The latest scrape succeeded.
    Up,
    /// The latest scrape failed or timed out.
    Down,
}

/// An explicit scraper operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScrapeRequest {
    /// Scrape out of schedule; the next scheduled scrape is unaffected.
    ScrapeNow {
        /// Target to scrape.
        target: String,
    },
}

/// Result of a [`ScrapeRequest`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScrapeResponse {
    /// What one scrape found.
    Scraped {
        /// Scraped target.
        target: String,
        /// Health after the scrape.
        health: Health,
        /// Samples ingested; 0 on failure.
        samples: u64,
        /// Why the scrape failed.
        error: Option<String>,
    },
}

/// Read-only scraper queries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScrapeQuery {
    /// Status of every target.
    Targets,
    /// Status of one target.
    Target(String),
    /// The newest operation records.
    RecentOperations {
        /// At most this many records.
        limit: usize,
    },
}

/// One target's scrape history.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetStatus {
    /// Target name.
    pub name: String,
    /// Job label.
    pub job: String,
    /// Outcome of the latest scrape.
    pub health: Health,
    /// When the latest scrape ran.
    pub last_scrape_at: Option<SimTime>,
    /// How long the latest scrape took.
    pub last_duration_ms: f64,
    /// Why the latest scrape failed.
    pub last_error: Option<String>,
    /// When the next scheduled scrape is due.
    pub next_scrape_at: SimTime,
    /// Scrapes run so far.
    pub scrapes: u64,
    /// Scrapes that failed so far.
    pub failures: u64,
    /// Samples ingested from this target so far.
    pub samples_ingested: u64,
}

/// Answer to a [`ScrapeQuery`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScrapeView {
    /// Every target.
    Targets(Vec<TargetStatus>),
    /// One target.
    Target(TargetStatus),
    /// Operation records.
    Operations(Vec<OperationRecord>),
}

/// Scraper part of a node's metrics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeMetrics {
    /// Per-target status.
    pub targets: BTreeMap<String, TargetStatus>,
    /// Targets whose latest scrape succeeded.
    pub up: u64,
    /// Targets whose latest scrape failed.
    pub down: u64,
    /// Samples ingested across targets so far.
    pub samples_ingested: u64,

    /// Samples per second over the last minute.
    pub ingestion_rate: f64,
}

struct Target {
    config: TargetConfig,
    status: TargetStatus,
}

/// Simulates one metrics scraper node.
pub struct ScrapeEngine {
    config: ScrapeConfig,
    targets: BTreeMap<String, Target>,
    ingested: SlidingWindowCounter,
    log: OperationLog,
    rng: StdRng,
    now: SimTime,
}

impl ScrapeEngine {
    /// Engine with each target's first scrape one interval out.
    #[must_use]
    pub fn new(config: ScrapeConfig, seed: u64) -> Self {
        let mut engine = Self {
            config: ScrapeConfig::default(),
            targets: BTreeMap::new(),
            ingested: SlidingWindowCounter::new(secs(INGESTION_WINDOW_SECS)),
            log: OperationLog::default(),
            rng: rng_from_seed(seed),
            now: 0,
        };
        engine.apply_config(config);
        engine
    }

    /// Status of one target.
    #[must_use]
    pub fn target(&self, name: &str) -> Option<&TargetStatus> {
        self.targets.get(name).map(|t| &t.status)
    }

    /// Run one request at the current simulated time and log its outcome.
    pub fn apply(&mut self, request: &ScrapeRequest) -> anyhow::Result<Completed<ScrapeResponse>> {
        let ScrapeRequest::ScrapeNow { target } = request;
        let outcome = self.scrape(target);

        // A scrape that reached the target but failed took real time; log that latency.
        if let Ok(done) = &outcome {
            if matches!(done.value, ScrapeResponse::Scraped { health: Health::Down, .. }) {
                self.log.append(OperationRecord::error(self.now, OpKind::Scrape, done.latency_ms).with_target(target));
                return outcome;
            }
        }
        let samples = match &outcome {
            Ok(Completed { value: ScrapeResponse::Scraped { samples, .. }, .. }) => *samples,
            Err(_) => 0,
        };
        settle(&mut self.log, &OpContext::new(self.now, OpKind::Scrape, target).sized(samples), outcome)
    }

    #[allow(clippy::cast_precision_loss)]
    fn scrape(&mut self, name: &str) -> anyhow::Result<Completed<ScrapeResponse>> {
        let now = self.now;
        let target = self.targets.get_mut(name).ok_or_else(|| ScrapeError::target_not_found(name))?;
        let config = &target.config;

        let jitter: f64 = self.rng.gen_range(0.8..1.2);
        let mut duration = (config.base_latency_ms + config.series as f64 * MS_PER_SERIES) * jitter;
        let timeout = config.timeout_ms as f64;
        let error = if duration > timeout {
            duration = timeout;
            Some("context deadline exceeded".to_owned())
        } else if chance(&mut self.rng, config.failure_rate) {
            Some("connection refused".to_owned())
        } else {
            None
        };

        let status = &mut target.status;
        status.scrapes += 1;
        status.last_scrape_at = Some(now);
        status.last_duration_ms = duration;
        let samples = if error.is_some() {
            if status.health != Health::Down {
                info!(target_name = name, "scrape target down");
            }
            status.failures += 1;
            status.health = Health::Down;
            0
        } else {
            status.health = Health::Up;
            status.samples_ingested = status.samples_ingested.saturating_add(config.series);
            self.ingested.record_n(now, config.series);
            config.series
        };
        status.last_error.clone_from(&error);

        Ok(Completed::new(
            duration,
            ScrapeResponse::Scraped { target: name.into(), health: status.health, samples, error },
        ))
    }

    fn apply_config(&mut self, config: ScrapeConfig) {
        let mut targets = BTreeMap::new();
        for target_config in &config.targets {
            let target = match self.targets.remove(&target_config.name) {
                Some(mut existing) => {
                    existing.status.job.clone_from(&target_config.job);
                    existing.config = target_config.clone();
                    existing
                },
                None => {
                    let status = TargetStatus {
                        name: target_config.name.clone(),
                        job: target_config.job.clone(),
                        next_scrape_at: self.now + interval(target_config),
                        ..Default::default()
                    };
                    Target { config: target_config.clone(), status }
                },
            };
            targets.insert(target_config.name.clone(), target);
        }
        self.targets = targets;
        self.config = config;
    }

    /// Scheduled scrapes in `(previous, now]`, in time order.  A target that missed more than
    /// [`MAX_OPS_PER_TICK`] scrapes only gets the most recent ones.
    fn due(&mut self, now: SimTime) -> Vec<(SimTime, String)> {
        let mut due = vec![];
        for (name, target) in &mut self.targets {
            let step = interval(&target.config);
            let next = &mut target.status.next_scrape_at;
            if *next > now {
                continue;
            }
            let missed = (now - *next) / step + 1;
            let cap = i64::try_from(MAX_OPS_PER_TICK).unwrap_or(i64::MAX);
            if missed > cap {
                debug!(target_name = %name, missed, "skipping missed scrapes");
                *next += (missed - cap) * step;
            }
            while *next <= now {
                due.push((*next, name.clone()));
                *next += step;
            }
        }
        due.sort();
        due
    }

    fn scrape_query(&self, query: &ScrapeQuery) -> anyhow::Result<ScrapeView> {
        let view = match query {
            ScrapeQuery::Targets => ScrapeView::Targets(self.targets.values().map(|t| t.status.clone()).collect()),
            ScrapeQuery::Target(name) => {
                ScrapeView::Target(self.target(name).cloned().ok_or_else(|| ScrapeError::target_not_found(name))?)
            },
            ScrapeQuery::RecentOperations { limit } => ScrapeView::Operations(self.log.recent(*limit)),
        };
        Ok(view)
    }

    fn snapshot(&self) -> MetricsSnapshot {
        let statuses: BTreeMap<_, _> = self.targets.iter().map(|(name, t)| (name.clone(), t.status.clone())).collect();
        let count = |h| statuses.values().filter(|s| s.health == h).count() as u64;
        let ingestion_rate = self.ingested.rate(self.now);
        let domain = ScrapeMetrics {
            up: count(Health::Up),
            down: count(Health::Down),
            samples_ingested: statuses.values().map(|s| s.samples_ingested).fold(0, u64::saturating_add),
            ingestion_rate,
            targets: statuses,
        };
        let series = self
            .targets
            .values()
            .filter(|t| t.status.health == Health::Up)
            .map(|t| t.config.series)
            .fold(0, u64::saturating_add);

        MetricsSnapshot::from_log(ComponentKind::MetricsScraper, &self.log, self.now)
            .with_count("targets", self.targets.len() as u64)
            .with_count("up", domain.up)
            .with_count("series", series)
            .with_utilization("ingestion", stats::utilization(ingestion_rate, self.config.ingestion_capacity))
            .with_domain(DomainMetrics::Scrape(domain))
    }
}

fn interval(config: &TargetConfig) -> SimTime {
    secs(i64::try_from(config.interval_secs).unwrap_or(i64::MAX / 1000)).max(1)
}

impl RoutingEngine for ScrapeEngine {
    fn kind(&self) -> ComponentKind {
        ComponentKind::MetricsScraper
    }

    fn reconfigure(&mut self, config: &ComponentConfig) -> EmptyResult {
        let config = expect_variant!(config, ComponentConfig::MetricsScraper, "scrape config")?;
        self.apply_config(config.clone());
        Ok(())
    }

    fn advance(&mut self, now: SimTime) -> EmptyResult {
        if now < self.now {
            return Ok(());
        }
        for (at, target) in self.due(now) {
            self.now = at;
            let _ = self.apply(&ScrapeRequest::ScrapeNow { target });
        }
        self.now = now;
        Ok(())
    }

    fn execute(&mut self, request: &OperationRequest) -> anyhow::Result<OperationResult> {
        let request = expect_variant!(request, OperationRequest::Scrape, "scrape request")?;
        let done = self.apply(request)?;
        Ok(OperationResult { latency_ms: done.latency_ms, detail: ResponseDetail::Scrape(done.value) })
    }

    fn query(&self, query: &DomainQuery) -> anyhow::Result<DomainView> {
        match query {
            DomainQuery::Scrape(q) => Ok(DomainView::Scrape(self.scrape_query(q)?)),
            other => Err(EngineError::unsupported_query(&format!("{other:?}"))),
        }
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.snapshot()
    }
}

#[cfg(test)]
mod tests;
