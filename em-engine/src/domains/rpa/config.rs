use std::collections::HashSet;

use derive_setters::Setters;
use serde::{
    Deserialize,
    Serialize,
};
use tracing::warn;

use crate::config::sanitize_f64;

/// Default run history size.
pub const DEFAULT_MAX_RUNS: usize = 200;

/// RPA orchestrator settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Setters)]
#[serde(default, rename_all = "camelCase")]
pub struct RpaConfig {
    /// Bots that can be triggered; names are unique.
    pub bots: Vec<BotConfig>,

    /// Synthetic run triggers per second, spread uniformly over the bots.
    pub runs_per_sec: f64,

    /// Runs executing at the same time; further runs wait in the queue.
    pub max_concurrent_runs: usize,

    /// Run history size; the oldest finished runs are dropped beyond it.
    pub max_runs: usize,
    /// Seed for the node's generator; random if unset.
    pub seed: Option<u64>,
}

impl Default for RpaConfig {
    fn default() -> Self {
        Self {
            bots: vec![BotConfig::new("invoice-entry", 6, 4_000), BotConfig::new("report-export", 3, 15_000)],
            runs_per_sec: 0.1,
            max_concurrent_runs: 2,
            max_runs: DEFAULT_MAX_RUNS,
            seed: None,
        }
    }
}

impl RpaConfig {
    pub(crate) fn normalize(&mut self) {
        let defaults = Self::default();
        sanitize_f64(&mut self.runs_per_sec, 0.0, 1_000.0, defaults.runs_per_sec, "runsPerSec");
        if self.max_concurrent_runs == 0 {
            self.max_concurrent_runs = defaults.max_concurrent_runs;
        }
        if self.max_runs == 0 {
            self.max_runs = defaults.max_runs;
        }

        let mut seen = HashSet::new();
        self.bots.retain(|b| {
            let keep = !b.name.trim().is_empty() && seen.insert(b.name.clone());
            if !keep {
                warn!(bot = %b.name, "dropping empty or duplicate bot name");
            }
            keep
        });
        for bot in &mut self.bots {
            bot.steps = bot.steps.max(1);
            bot.step_duration_ms = bot.step_duration_ms.max(1);
            sanitize_f64(&mut bot.step_failure_rate, 0.0, 1.0, 0.0, "stepFailureRate");
        }
    }
}

/// One bot and the shape of its runs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, Setters)]
#[serde(default, rename_all = "camelCase")]
pub struct BotConfig {
    /// Unique bot name.
    #[setters(into)]
    pub name: String,
    /// Steps per run.
    pub steps: u32,
    /// Simulated time each step takes.
    pub step_duration_ms: u64,

    /// Chance that any one step fails and aborts the run.
    pub step_failure_rate: f64,
}

impl BotConfig {
    /// Bot with the default step failure rate.
    #[must_use]
    pub fn new(name: &str, steps: u32, step_duration_ms: u64) -> Self {
        Self { name: name.into(), steps, step_duration_ms, step_failure_rate: 0.01 }
    }
}
