#![deny(
    // Strict on purpose: an exception has to be spelled out as an inline allow, which flags it for a
    // second look in review.
    clippy::nursery,
    clippy::pedantic,
)]
#![warn(missing_docs)]

//! Shared plumbing for the emulation engine: error helpers, logging setup, simulated time,
//! and the statistics layer (`stats` + `oplog`) that every domain engine derives its telemetry
//! from.

/// Error helpers and the `err_impl!` macro.
pub mod errors;
/// `tracing` subscriber setup for the binaries.
pub mod logging;
/// Per-node operation log and its summaries.
pub mod oplog;
/// Glob-importable names used by every engine.
pub mod prelude;
/// Throughput, percentile and utilization helpers.
pub mod stats;
/// Simulated time units.
pub mod time;
