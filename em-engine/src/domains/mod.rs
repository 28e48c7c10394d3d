//! One simulator per component family.  Each module exposes the same shape: a `*Config`, an
//! engine implementing [`RoutingEngine`](crate::engine::RoutingEngine), request/response and
//! query/view enums for the explicit API, and a `*Metrics` payload for snapshots.

pub mod database;
pub mod integration;
pub mod messaging;
pub mod object_storage;
pub mod payment;
pub mod rpa;
pub mod scrape;
pub mod tracer;
