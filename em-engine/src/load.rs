//! Synthetic load: turns a configured rate into operation timestamps for each advanced interval.
use std::collections::hash_map::DefaultHasher;
use std::hash::{
    Hash,
    Hasher,
};

use em_core::time::{
    as_secs_f64,
    SimTime,
    SECOND,
};
use rand::distributions::{
    Distribution,
    WeightedIndex,
};
use rand::rngs::StdRng;
use rand::{
    Rng,
    SeedableRng,
};

/// Floor of the per-interval cap: a catch-up jump always replays at least this many operations.
pub const MAX_OPS_PER_TICK: usize = 500;

/// Intervals up to this long are replayed in full.  A longer jump (a fast-forward over days) only
/// replays this much load at the configured rate, or [`MAX_OPS_PER_TICK`] operations, whichever
/// is larger; the rest is dropped.
pub const MAX_REPLAY_SPAN: SimTime = 10 * SECOND;

/// Paces synthetic operations at a configured rate, carrying fractional operations between
/// the intervals it is asked about.
#[derive(Clone, Debug, Default)]
pub struct LoadGenerator {
    carry: f64,
    last: Option<SimTime>,
}

impl LoadGenerator {
    /// A generator that anchors on its first [`LoadGenerator::due`] call.
    #[must_use]
    pub const fn new() -> Self {
        Self { carry: 0.0, last: None }
    }

    /// Start counting from `now` (used by engines that were created mid-simulation).
    pub fn anchor(&mut self, now: SimTime) {
        self.last = Some(now);
    }

    /// Timestamps of the operations due in `(last, now]` at `rate_per_sec`, evenly spread over the
    /// interval.  The first call only anchors the generator.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn due(&mut self, now: SimTime, rate_per_sec: f64) -> Vec<SimTime> {
        let Some(last) = self.last.replace(now) else {
            return vec![];
        };
        if now <= last || rate_per_sec <= 0.0 || !rate_per_sec.is_finite() {
            return vec![];
        }

        let expected = as_secs_f64(now - last) * rate_per_sec + self.carry;
        let whole = expected.floor();
        self.carry = expected - whole;

        let cap = ((rate_per_sec * as_secs_f64(MAX_REPLAY_SPAN)).ceil() as usize).max(MAX_OPS_PER_TICK);
        let n = (whole as usize).min(cap);
        if n == 0 {
            return vec![];
        }
        let span = (now - last) as f64;
        (1..=n).map(|i| last + (span * i as f64 / n as f64).round() as SimTime).collect()
    }
}

/// Deterministic per-node seed derived from the node id.
#[must_use]
pub fn seed_for(node_id: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    node_id.hash(&mut hasher);
    hasher.finish()
}

/// Seeded RNG; the same seed always replays the same load.
#[must_use]
pub fn rng_from_seed(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Bernoulli trial that tolerates out-of-range probabilities.
pub fn chance(rng: &mut StdRng, p: f64) -> bool {
    if !p.is_finite() || p <= 0.0 {
        return false;
    }
    rng.gen_bool(p.min(1.0))
}

/// Short lowercase hex id, e.g. for upload ids and span ids.
pub fn hex_id(rng: &mut StdRng) -> String {
    format!("{:016x}", rng.gen::<u64>())
}

/// Pick an index proportionally to `weights`; `None` if no weight is positive.  Negative and
/// non-finite weights count as zero.
pub fn weighted_index(rng: &mut StdRng, weights: &[f64]) -> Option<usize> {
    let dist = WeightedIndex::new(weights.iter().map(|&w| if w.is_finite() && w > 0.0 { w } else { 0.0 })).ok()?;
    Some(dist.sample(rng))
}
