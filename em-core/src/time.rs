//! Simulated time.  All engine timestamps are integer milliseconds since the simulation epoch,
//! which keeps the simulation deterministic and trivially pausable: time only moves when the
//! clock says so.

/// Simulated milliseconds since the simulation epoch.
pub type SimTime = i64;

/// One simulated millisecond.
pub const MILLISECOND: SimTime = 1;
/// One simulated second.
pub const SECOND: SimTime = 1000 * MILLISECOND;
/// One simulated minute.
pub const MINUTE: SimTime = 60 * SECOND;
/// One simulated hour.
pub const HOUR: SimTime = 60 * MINUTE;
/// One simulated day.
pub const DAY: SimTime = 24 * HOUR;

/// `n` days.
#[must_use]
pub const fn days(n: i64) -> SimTime {
    n * DAY
}

/// `n` seconds.
#[must_use]
pub const fn secs(n: i64) -> SimTime {
    n * SECOND
}

/// Fractional seconds.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn as_secs_f64(t: SimTime) -> f64 {
    t as f64 / SECOND as f64
}
