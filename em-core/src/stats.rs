//! StatisticsKit: the generic helpers every metrics engine leans on.
//!
//! Nothing in here knows about any particular domain.  The helpers are either free functions over
//! a caller-provided slice (so the caller decides what to snapshot) or the bounded
//! [`SlidingWindowCounter`] that owns its events.
use std::collections::VecDeque;

use crate::time::{
    as_secs_f64,
    SimTime,
    SECOND,
};

/// Default width of the throughput window.
pub const DEFAULT_RATE_WINDOW: SimTime = SECOND;

/// Count of timestamps in the half-open window `(now - window, now]`, divided by the window width
/// in seconds.
#[must_use]
pub fn throughput<I>(timestamps: I, now: SimTime, window: SimTime) -> f64
where
    I: IntoIterator<Item = SimTime>,
{
    if window <= 0 {
        return 0.0;
    }
    let start = now - window;
    let count = timestamps.into_iter().filter(|&ts| ts > start && ts <= now).count();

    #[allow(clippy::cast_precision_loss)]
    let count = count as f64;
    count / as_secs_f64(window)
}

/// Returns `sorted[floor(p / 100 * n)]`, clamped to the last element; zero for an empty slice.
/// The input must already be sorted ascending.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
#[must_use]
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let n = sorted.len();
    let idx = ((p.clamp(0.0, 100.0) / 100.0) * n as f64).floor() as usize;
    sorted[idx.min(n - 1)]
}

/// Arithmetic mean; zero for an empty slice.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// `min(1, observed / capacity)`.  A non-positive capacity means "no capacity", which reads as
/// zero utilization rather than a division blow-up.
#[must_use]
pub fn utilization(observed: f64, capacity: f64) -> f64 {
    if capacity <= 0.0 || !observed.is_finite() {
        return 0.0;
    }
    (observed / capacity).clamp(0.0, 1.0)
}

/// Safe ratio helper used for error rates and the like.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    numerator as f64 / denominator as f64
}

/// Weighted sliding-window event counter.
///
/// Events older than one window behind the newest recorded event are dropped on the next write,
/// so reads never mutate.  Events sharing a timestamp are coalesced, which bounds the buffer by the
/// window width in milliseconds regardless of the event rate.
#[derive(Clone, Debug)]
pub struct SlidingWindowCounter {
    window: SimTime,
    events: VecDeque<(SimTime, u64)>,
    latest: Option<SimTime>,
}

impl SlidingWindowCounter {
    /// Counter over `(now - window, now]`; non-positive widths are bumped to one millisecond.
    #[must_use]
    pub fn new(window: SimTime) -> Self {
        Self { window: window.max(1), events: VecDeque::new(), latest: None }
    }

    /// Record one event at `ts`.
    pub fn record(&mut self, ts: SimTime) {
        self.record_n(ts, 1);
    }

    /// Record `n` events at `ts`, e.g. the spans of one batch.
    pub fn record_n(&mut self, ts: SimTime, n: u64) {
        if n == 0 {
            return;
        }
        match self.events.back_mut() {
            Some((last, count)) if *last == ts => *count = count.saturating_add(n),
            _ => self.events.push_back((ts, n)),
        }

        let latest = self.latest.map_or(ts, |l| l.max(ts));
        self.latest = Some(latest);
        let start = latest - self.window;
        while self.events.front().is_some_and(|&(t, _)| t <= start) {
            self.events.pop_front();
        }
    }

    /// Number of events in `(now - window, now]`.
    #[must_use]
    pub fn count(&self, now: SimTime) -> u64 {
        let start = now - self.window;
        self.events
            .iter()
            .filter(|(ts, _)| *ts > start && *ts <= now)
            .fold(0, |acc, (_, n)| acc.saturating_add(*n))
    }

    /// Events per second over the window.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn rate(&self, now: SimTime) -> f64 {
        self.count(now) as f64 / as_secs_f64(self.window)
    }

    /// Timestamp of the newest event ever recorded.
    #[must_use]
    pub const fn latest(&self) -> Option<SimTime> {
        self.latest
    }

    /// Width of the window.
    #[must_use]
    pub const fn window(&self) -> SimTime {
        self.window
    }
}

impl Default for SlidingWindowCounter {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_WINDOW)
    }
}

#[cfg(test)]
mod tests;
