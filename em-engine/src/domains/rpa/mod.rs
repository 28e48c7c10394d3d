//! RPA bots: triggered runs wait in a queue, execute their steps one slot at a time under a
//! concurrency cap, and finish (or fail at a step) once enough simulated time has passed.
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

/// Orchestrator overhead of accepting a trigger.
const TRIGGER_LATENCY_MS: f64 = 12.0;

err_impl! {RpaError,
    #[error("bot not found: {0}")]
    BotNotFound(String),

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("run already finished: {0}")]
    RunFinished(String),
}

/// Lifecycle state of a bot run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Waiting for a free slot.
    #[default]
    Queued,
    /// Executing its steps.
    Running,
    /// Every step succeeded.
    Completed,
    /// A step failed.
    Failed,
    /// Cancelled by a caller.
    Cancelled,
}

impl RunStatus {
    /// The run will not change again.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// One triggered execution of a bot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotRun {
    /// Orchestrator-assigned id.
    pub run_id: String,
    /// Bot being run.
    pub bot: String,
    /// Current state.
    pub status: RunStatus,
    /// Trigger time.
    pub queued_at: SimTime,
    /// When the run got a slot.
    pub started_at: Option<SimTime>,
    /// When the run reached a final state.
    pub finished_at: Option<SimTime>,
    /// Steps the bot is configured with.
    pub steps_total: u32,
    /// Steps finished so far.
    pub steps_completed: u32,

    /// 1-based index of the step that aborted the run.
    pub failed_step: Option<u32>,

    #[serde(skip)]
    ends_at: SimTime,
}

/// An explicit RPA operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RpaRequest {
    /// Queue a run of a configured bot.
    StartRun {
        /// Bot to run.
        bot: String,
    },
    /// Stop a queued or running run.
    CancelRun {
        /// Run to cancel.
        run_id: String,
    },
}

impl RpaRequest {
    /// Operation kind recorded in the log for this request.
    #[must_use]
    pub const fn op_kind(&self) -> OpKind {
        match self {
            Self::StartRun { .. } => OpKind::BotTrigger,
            Self::CancelRun { .. } => OpKind::Cancel,
        }
    }
}

/// Result of an [`RpaRequest`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RpaResponse {
    /// The run after the operation.
    Run(BotRun),
}

/// Read-only RPA queries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RpaQuery {
    /// Per-bot statistics.
    Bots,
    /// One run by id.
    Run(String),
    /// Newest runs first.
    Runs {
        /// Only runs of this bot.
        #[serde(default)]
        bot: Option<String>,
        /// At most this many runs.
        limit: usize,
    },
    /// The newest operation records.
    RecentOperations {
        /// At most this many records.
        limit: usize,
    },
}

/// Per-bot run statistics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotStats {
    /// Bot name.
    pub name: String,
    /// Runs triggered.
    pub runs: u64,
    /// Runs that finished every step.
    pub completed: u64,
    /// Runs aborted by a failed step.
    pub failed: u64,
    /// Mean duration of finished runs.
    pub avg_duration_ms: f64,
    /// Completed over finished runs.
    pub success_rate: f64,

    #[serde(skip)]
    total_duration_ms: f64,
}

impl BotStats {
    fn new(name: &str) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    #[allow(clippy::cast_precision_loss)]
    fn record(&mut self, status: RunStatus, duration_ms: f64) {
        match status {
            RunStatus::Completed => self.completed += 1,
            RunStatus::Failed => self.failed += 1,
            _ => return,
        }
        self.total_duration_ms += duration_ms;
        let finished = self.completed + self.failed;
        self.avg_duration_ms = self.total_duration_ms / finished as f64;
        self.success_rate = em_core::stats::ratio(self.completed, finished);
    }
}

/// Answer to an [`RpaQuery`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RpaView {
    /// Per-bot statistics.
    Bots(Vec<BotStats>),
    /// One run.
    Run(BotRun),
    /// Several runs.
    Runs(Vec<BotRun>),
    /// Operation records.
    Operations(Vec<OperationRecord>),
}

/// RPA part of a node's metrics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpaMetrics {
    /// Statistics keyed by bot name.
    pub bots: BTreeMap<String, BotStats>,
    /// Runs waiting for a slot.
    pub queued: u64,
    /// Runs holding a slot.
    pub running: u64,
    /// Completed runs, all time.
    pub completed: u64,
    /// Failed runs, all time.
    pub failed: u64,
    /// Cancelled runs, all time.
    pub cancelled: u64,
}

/// Simulated RPA orchestrator with a run queue and a concurrency cap.
pub struct RpaEngine {
    config: RpaConfig,
    bots: BTreeMap<String, BotStats>,
    runs: BTreeMap<String, BotRun>,

    /// Run ids in creation order, for history eviction.
    order: VecDeque<String>,
    queue: VecDeque<String>,
    running: Vec<String>,
    next_run: u64,
    cancelled: u64,
    log: OperationLog,
    load: LoadGenerator,
    rng: StdRng,
    now: SimTime,
}

impl RpaEngine {
    /// Orchestrator with every configured bot registered and no runs.
    #[must_use]
    pub fn new(config: RpaConfig, seed: u64) -> Self {
        let mut engine = Self {
            config: RpaConfig::default(),
            bots: BTreeMap::new(),
            runs: BTreeMap::new(),
            order: VecDeque::new(),
            queue: VecDeque::new(),
            running: vec![],
            next_run: 1,
            cancelled: 0,
            log: OperationLog::default(),
            load: LoadGenerator::new(),
            rng: rng_from_seed(seed),
            now: 0,
        };
        engine.apply_config(config);
        engine
    }

    /// Look up a run by id.
    #[must_use]
    pub fn run(&self, run_id: &str) -> Option<&BotRun> {
        self.runs.get(run_id)
    }

    /// Statistics for one bot.
    #[must_use]
    pub fn bot(&self, name: &str) -> Option<&BotStats> {
        self.bots.get(name)
    }

    /// Runs waiting for a slot.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Runs holding a slot.
    #[must_use]
    pub fn running(&self) -> usize {
        self.running.len()
    }

    /// Run an explicit operation against the orchestrator.
    pub fn apply(&mut self, request: &RpaRequest) -> anyhow::Result<Completed<RpaResponse>> {
        let target = match request {
            RpaRequest::StartRun { bot } => bot.clone(),
            RpaRequest::CancelRun { run_id } => self.runs.get(run_id).map_or_else(|| run_id.clone(), |r| r.bot.clone()),
        };
        let outcome = match request {
            RpaRequest::StartRun { bot } => self.start_run(bot),
            RpaRequest::CancelRun { run_id } => self.cancel_run(run_id),
        };
        settle(&mut self.log, &OpContext::new(self.now, request.op_kind(), &target), outcome)
    }

    fn start_run(&mut self, bot: &str) -> anyhow::Result<Completed<RpaResponse>> {
        if !self.bots.contains_key(bot) {
            return Err(RpaError::bot_not_found(bot));
        }
        let run_id = self.enqueue(bot, self.now);
        self.start_queued(self.now);
        let run = self.runs.get(&run_id).cloned().ok_or_else(|| RpaError::run_not_found(&run_id))?;
        Ok(Completed::new(TRIGGER_LATENCY_MS, RpaResponse::Run(run)))
    }

    fn cancel_run(&mut self, run_id: &str) -> anyhow::Result<Completed<RpaResponse>> {
        let now = self.now;
        let step_ms = self.runs.get(run_id).map_or(1, |r| self.step_duration(&r.bot));
        let run = self.runs.get_mut(run_id).ok_or_else(|| RpaError::run_not_found(run_id))?;
        if run.status.is_finished() {
            return Err(RpaError::run_finished(run_id));
        }
        run.status = RunStatus::Cancelled;
        run.finished_at = Some(now);
        if let Some(started) = run.started_at {
            run.steps_completed = completed_steps(now - started, step_ms);
        }
        let run = run.clone();

        self.queue.retain(|id| id != run_id);
        self.running.retain(|id| id != run_id);
        self.cancelled += 1;
        self.start_queued(now);
        self.evict();
        Ok(Completed::new(TRIGGER_LATENCY_MS, RpaResponse::Run(run)))
    }

    fn step_duration(&self, bot: &str) -> SimTime {
        self.config
            .bots
            .iter()
            .find(|b| b.name == bot)
            .map_or(1, |b| SimTime::try_from(b.step_duration_ms).unwrap_or(SimTime::MAX))
    }

    fn enqueue(&mut self, bot: &str, at: SimTime) -> String {
        let steps_total = self.config.bots.iter().find(|b| b.name == bot).map_or(1, |b| b.steps);
        let run_id = format!("run-{:06}", self.next_run);
        self.next_run += 1;

        let run = BotRun {
            run_id: run_id.clone(),
            bot: bot.into(),
            queued_at: at,
            steps_total,
            ..Default::default()
        };
        self.runs.insert(run_id.clone(), run);
        self.order.push_back(run_id.clone());
        self.queue.push_back(run_id.clone());
        if let Some(stats) = self.bots.get_mut(bot) {
            stats.runs += 1;
        }
        run_id
    }

    /// Fill free slots from the head of the queue.  The step that fails (if any) is drawn here, so
    /// the run's end time is known as soon as it starts.
    fn start_queued(&mut self, at: SimTime) {
        while self.running.len() < self.config.max_concurrent_runs {
            let Some(run_id) = self.queue.pop_front() else {
                break;
            };
            let Some(run) = self.runs.get(&run_id) else {
                continue;
            };
            let Some(bot) = self.config.bots.iter().find(|b| b.name == run.bot) else {
                continue;
            };

            let mut steps = bot.steps;
            let mut failed_step = None;
            for step in 1..=bot.steps {
                if chance(&mut self.rng, bot.step_failure_rate) {
                    failed_step = Some(step);
                    steps = step;
                    break;
                }
            }
            let step_ms = SimTime::try_from(bot.step_duration_ms).unwrap_or(SimTime::MAX);

            let Some(run) = self.runs.get_mut(&run_id) else {
                continue;
            };
            run.status = RunStatus::Running;
            run.started_at = Some(at);
            run.failed_step = failed_step;
            run.ends_at = at.saturating_add(step_ms.saturating_mul(SimTime::from(steps)));
            self.running.push(run_id);
        }
    }

    /// Finish every run whose end time has passed, oldest first, starting queued runs into each
    /// freed slot at the moment it frees up.
    fn settle_runs(&mut self, now: SimTime) {
        loop {
            let next = self
                .running
                .iter()
                .filter_map(|id| self.runs.get(id))
                .filter(|r| r.ends_at <= now)
                .min_by(|a, b| a.ends_at.cmp(&b.ends_at).then_with(|| a.run_id.cmp(&b.run_id)))
                .map(|r| (r.run_id.clone(), r.ends_at));
            let Some((run_id, at)) = next else {
                break;
            };
            self.finish(&run_id, at);
            self.start_queued(at);
        }
        self.start_queued(now);
        self.evict();
    }

    #[allow(clippy::cast_precision_loss)]
    fn finish(&mut self, run_id: &str, at: SimTime) {
        self.running.retain(|id| id != run_id);
        let Some(run) = self.runs.get_mut(run_id) else {
            return;
        };
        let started = run.started_at.unwrap_or(at);
        let duration = (at - started) as f64;
        run.finished_at = Some(at);
        match run.failed_step {
            Some(step) => {
                run.status = RunStatus::Failed;
                run.steps_completed = step - 1;
                debug!(run_id, bot = %run.bot, step, "bot run failed");
            },
            None => {
                run.status = RunStatus::Completed;
                run.steps_completed = run.steps_total;
            },
        }

        let record = if run.status == RunStatus::Failed {
            OperationRecord::error(at, OpKind::BotRun, duration)
        } else {
            OperationRecord::success(at, OpKind::BotRun, duration)
        };
        self.log.append(record.with_target(&run.bot));
        if let Some(stats) = self.bots.get_mut(&run.bot) {
            stats.record(run.status, duration);
        }
    }

    /// Drop the oldest finished runs beyond the history limit; active runs are never evicted.
    fn evict(&mut self) {
        let mut excess = self.runs.len().saturating_sub(self.config.max_runs);
        if excess == 0 {
            return;
        }
        let mut kept = VecDeque::with_capacity(self.order.len());
        while let Some(run_id) = self.order.pop_front() {
            let finished = self.runs.get(&run_id).is_some_and(|r| r.status.is_finished());
            if excess > 0 && finished {
                self.runs.remove(&run_id);
                excess -= 1;
            } else {
                kept.push_back(run_id);
            }
        }
        self.order = kept;
    }

    fn apply_config(&mut self, config: RpaConfig) {
        let mut bots = BTreeMap::new();
        for bot in &config.bots {
            let stats = self.bots.remove(&bot.name).unwrap_or_else(|| BotStats::new(&bot.name));
            bots.insert(bot.name.clone(), stats);
        }
        self.bots = bots;
        self.config = config;

        // Queued runs of a removed bot can never start.
        let removed: Vec<String> = self
            .queue
            .iter()
            .filter(|id| self.runs.get(*id).is_some_and(|r| !self.bots.contains_key(&r.bot)))
            .cloned()
            .collect();
        for run_id in removed {
            if let Some(run) = self.runs.get_mut(&run_id) {
                run.status = RunStatus::Cancelled;
                run.finished_at = Some(self.now);
                self.cancelled += 1;
            }
            self.queue.retain(|id| id != &run_id);
        }
        self.start_queued(self.now);
        self.evict();
    }

    fn synthetic_trigger(&mut self, at: SimTime) {
        if self.bots.is_empty() {
            return;
        }
        let index = self.rng.gen_range(0..self.bots.len());
        let Some(bot) = self.bots.keys().nth(index).cloned() else {
            return;
        };
        self.now = at;
        let _ = self.apply(&RpaRequest::StartRun { bot });
    }

    fn rpa_query(&self, query: &RpaQuery) -> anyhow::Result<RpaView> {
        let view = match query {
            RpaQuery::Bots => RpaView::Bots(self.bots.values().cloned().collect()),
            RpaQuery::Run(run_id) => {
                RpaView::Run(self.runs.get(run_id).cloned().ok_or_else(|| RpaError::run_not_found(run_id))?)
            },
            RpaQuery::Runs { bot, limit } => {
                if let Some(name) = bot {
                    if !self.bots.contains_key(name) {
                        return Err(RpaError::bot_not_found(name));
                    }
                }
                RpaView::Runs(
                    self.order
                        .iter()
                        .rev()
                        .filter_map(|id| self.runs.get(id))
                        .filter(|r| bot.as_ref().map_or(true, |b| &r.bot == b))
                        .take(*limit)
                        .cloned()
                        .collect(),
                )
            },
            RpaQuery::RecentOperations { limit } => RpaView::Operations(self.log.recent(*limit)),
        };
        Ok(view)
    }

    #[allow(clippy::cast_precision_loss)]
    fn snapshot(&self) -> MetricsSnapshot {
        let domain = RpaMetrics {
            bots: self.bots.clone(),
            queued: self.queue.len() as u64,
            running: self.running.len() as u64,
            completed: self.bots.values().map(|b| b.completed).sum(),
            failed: self.bots.values().map(|b| b.failed).sum(),
            cancelled: self.cancelled,
        };

        MetricsSnapshot::from_log(ComponentKind::RpaBot, &self.log, self.now)
            .with_count("bots", self.bots.len() as u64)
            .with_count("queued", self.queue.len() as u64)
            .with_count("running", self.running.len() as u64)
            .with_utilization(
                "slots",
                em_core::stats::utilization(self.running.len() as f64, self.config.max_concurrent_runs as f64),
            )
            .with_domain(DomainMetrics::Rpa(domain))
    }
}

fn completed_steps(elapsed: SimTime, step_ms: SimTime) -> u32 {
    if step_ms <= 0 {
        return 0;
    }
    u32::try_from(elapsed.max(0) / step_ms).unwrap_or(u32::MAX)
}

impl RoutingEngine for RpaEngine {
    fn kind(&self) -> ComponentKind {
        ComponentKind::RpaBot
    }

    fn reconfigure(&mut self, config: &ComponentConfig) -> EmptyResult {
        let config = expect_variant!(config, ComponentConfig::RpaBot, "rpa config")?;
        self.apply_config(config.clone());
        Ok(())
    }

    fn advance(&mut self, now: SimTime) -> EmptyResult {
        if now < self.now {
            return Ok(());
        }
        for at in self.load.due(now, self.config.runs_per_sec) {
            self.settle_runs(at);
            self.synthetic_trigger(at);
        }
        self.now = now;
        self.settle_runs(now);
        Ok(())
    }

    fn execute(&mut self, request: &OperationRequest) -> anyhow::Result<OperationResult> {
        let request = expect_variant!(request, OperationRequest::Rpa, "rpa request")?;
        let done = self.apply(request)?;
        Ok(OperationResult { latency_ms: done.latency_ms, detail: ResponseDetail::Rpa(done.value) })
    }

    fn query(&self, query: &DomainQuery) -> anyhow::Result<DomainView> {
        match query {
            DomainQuery::Rpa(q) => Ok(DomainView::Rpa(self.rpa_query(q)?)),
            other => Err(EngineError::unsupported_query(&format!("{other:?}"))),
        }
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.snapshot()
    }
}

#[cfg(test)]
mod tests;
