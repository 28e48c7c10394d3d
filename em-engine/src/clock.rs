//! The single tick loop that moves simulated time forward.
//!
//! Simulated time only moves inside [`SimulationClock::tick`] / [`SimulationClock::advance_by`],
//! and only while the clock is running.  Stopping the clock never touches engine state, so a
//! stopped simulation can be inspected and later resumed exactly where it was.
use std::sync::atomic::{
    AtomicBool,
    AtomicI64,
    AtomicU64,
    Ordering,
};
use std::sync::Arc;

use chrono::{
    DateTime,
    Duration,
    Utc,
};
use clockabilly::{
    Clockable,
    UtcClock,
};
use em_core::prelude::*;
use parking_lot::Mutex;
use serde::{
    Deserialize,
    Serialize,
};
use tokio::sync::watch;
use tracing::*;

use crate::config::ClockConfig;
use crate::registry::{
    AdvanceOutcome,
    NodeRegistry,
};

/// Outcome of one [`SimulationClock::tick`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    /// Sequence number of this tick, starting at 1.
    pub tick: u64,
    /// Simulated time the tick advanced to.
    pub now: SimTime,
    /// Nodes that moved to `now`.
    pub advanced: usize,
    /// Nodes unregistered while the tick was in flight.
    pub skipped: usize,
    /// Nodes whose advance failed or panicked.
    pub faulted: usize,
}

/// Drives every registered node forward in simulated time.
pub struct SimulationClock {
    registry: Arc<NodeRegistry>,
    config: ClockConfig,

    /// Wall-clock timestamp (seconds) that simulated time zero maps to.
    epoch_ts: i64,
    now: AtomicI64,
    ticks: AtomicU64,
    running: AtomicBool,

    /// Serializes ticks; a tick never overlaps another.
    tick_lock: Mutex<()>,
}

impl SimulationClock {
    /// Clock over `registry`, with the epoch taken from the system clock.
    #[must_use]
    pub fn new(registry: Arc<NodeRegistry>, config: ClockConfig) -> Self {
        Self::with_wall_clock(registry, config, UtcClock::boxed())
    }

    /// Use `wall` to pick the epoch; handy for pinning displayed timestamps in tests.
    #[must_use]
    pub fn with_wall_clock(registry: Arc<NodeRegistry>, config: ClockConfig, wall: Box<dyn Clockable + Send>) -> Self {
        let now = registry.now();
        Self {
            registry,
            config,
            epoch_ts: wall.now_ts(),
            now: AtomicI64::new(now),
            ticks: AtomicU64::new(0),
            running: AtomicBool::new(false),
            tick_lock: Mutex::new(()),
        }
    }

    /// Tick period and time scale this clock runs with.
    #[must_use]
    pub fn config(&self) -> &ClockConfig {
        &self.config
    }

    /// The registry this clock advances.
    #[must_use]
    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Returns `false` if the clock was already running.
    pub fn start(&self) -> bool {
        let started = !self.running.swap(true, Ordering::SeqCst);
        if started {
            info!(now = self.now(), "simulation clock started");
        }
        started
    }

    /// Returns `false` if the clock was already stopped.  A tick in flight runs to completion.
    pub fn stop(&self) -> bool {
        let stopped = self.running.swap(false, Ordering::SeqCst);
        if stopped {
            info!(now = self.now(), "simulation clock stopped");
        }
        stopped
    }

    /// Whether the real-time loop is (or should keep) running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current simulated time.
    #[must_use]
    pub fn now(&self) -> SimTime {
        self.now.load(Ordering::SeqCst)
    }

    /// Ticks completed so far.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Wall-clock rendering of the current simulated time.
    #[must_use]
    pub fn sim_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.epoch_ts, 0).map(|epoch| epoch + Duration::milliseconds(self.now()))
    }

    /// One regular tick of `tickPeriodMs * timeScale` simulated milliseconds.  `None` while
    /// stopped.
    pub fn tick(&self) -> Option<TickReport> {
        self.advance_by(self.config.sim_step())
    }

    /// Tick with an explicit simulated step, e.g. to fast-forward days at once.
    pub fn advance_by(&self, delta: SimTime) -> Option<TickReport> {
        if !self.is_running() {
            return None;
        }
        Some(self.step(delta.max(0)))
    }

    #[instrument(skip(self), fields(tick = field::Empty, now = field::Empty))]
    fn step(&self, delta: SimTime) -> TickReport {
        let _guard = self.tick_lock.lock();
        let now = self.now.load(Ordering::SeqCst).saturating_add(delta);
        self.now.store(now, Ordering::SeqCst);
        self.registry.set_now(now);
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        Span::current().record("tick", tick).record("now", now);

        let mut report = TickReport { tick, now, ..Default::default() };
        for handle in self.registry.active_handles() {
            match handle.advance(now) {
                AdvanceOutcome::Advanced => report.advanced += 1,
                AdvanceOutcome::Skipped => report.skipped += 1,
                AdvanceOutcome::Faulted => report.faulted += 1,
            }
        }

        if report.faulted > 0 {
            warn!(faulted = report.faulted, "some nodes faulted during tick");
        }
        debug!(advanced = report.advanced, skipped = report.skipped, "tick complete");
        report
    }

    /// Tick in real time every `tickPeriodMs` until `shutdown` flips to `true`.  Starts the clock
    /// if needed and stops it on the way out.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        self.start();
        let mut interval = tokio::time::interval(self.config.tick_period());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick();
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                },
            }
        }
        self.stop();
    }
}

#[cfg(test)]
mod tests;
