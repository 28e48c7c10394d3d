#![deny(
    // Strict on purpose: an exception has to be spelled out as an inline allow, which flags it for a
    // second look in review.
    clippy::nursery,
    clippy::pedantic,
)]
#![warn(missing_docs)]

//! # em-engine – the emulation engine behind the infrastructure diagram
//!
//! Every component placed on the diagram (object store, broker, tracer, payment gateway, ...) gets
//! a [`RoutingEngine`](crate::engine::RoutingEngine) that owns synthetic but internally-consistent
//! domain state and an [`OperationLog`](em_core::oplog::OperationLog) of everything it "did".
//! Metrics snapshots are derived from those two things on demand.
//!
//! ## Moving parts
//! 1. [`NodeRegistry`](crate::registry::NodeRegistry) – node id → engine handle; owns creation,
//!    config merges and teardown.
//! 2. [`SimulationClock`](crate::clock::SimulationClock) – the single tick loop.  Each tick
//!    snapshots the registry's handles and advances each node, isolating panics and errors to the
//!    node that raised them.
//! 3. [`domains`] – one engine per component family, each with its own state machines and
//!    metrics.
//!
//! All time inside the engine is simulated ([`SimTime`](em_core::time::SimTime)); nothing in
//! here sleeps or spawns timers, so the whole simulation pauses when the clock stops.

pub mod clock;
pub mod config;
pub mod domains;
pub mod engine;
pub mod errors;
pub mod load;
pub mod metrics;
pub mod registry;

#[cfg(test)]
mod testutils;

pub use clock::{
    SimulationClock,
    TickReport,
};
pub use config::{
    ClockConfig,
    ComponentConfig,
    ComponentKind,
};
pub use engine::{
    DomainQuery,
    DomainView,
    OperationRequest,
    OperationResult,
    RoutingEngine,
};
pub use metrics::MetricsSnapshot;
pub use registry::{
    EngineHandle,
    NodeRegistry,
};
