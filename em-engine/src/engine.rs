//! The seam between the registry/clock and the per-family simulators.
use em_core::oplog::{
    OpKind,
    OperationLog,
    OperationRecord,
};
use em_core::prelude::*;
#[cfg(test)]
use mockall::automock;
use serde::{
    Deserialize,
    Serialize,
};

use crate::config::{
    ComponentConfig,
    ComponentKind,
};
use crate::domains::database::{
    DatabaseEngine,
    DatabaseQuery,
    DatabaseRequest,
    DatabaseResponse,
    DatabaseView,
};
use crate::domains::integration::{
    IntegrationEngine,
    IntegrationQuery,
    IntegrationRequest,
    IntegrationResponse,
    IntegrationView,
};
use crate::domains::messaging::{
    MessagingEngine,
    MessagingQuery,
    MessagingRequest,
    MessagingResponse,
    MessagingView,
};
use crate::domains::object_storage::{
    ObjectStorageEngine,
    StorageQuery,
    StorageRequest,
    StorageResponse,
    StorageView,
};
use crate::domains::payment::{
    PaymentEngine,
    PaymentQuery,
    PaymentRequest,
    PaymentResponse,
    PaymentView,
};
use crate::domains::rpa::{
    RpaEngine,
    RpaQuery,
    RpaRequest,
    RpaResponse,
    RpaView,
};
use crate::domains::scrape::{
    ScrapeEngine,
    ScrapeQuery,
    ScrapeRequest,
    ScrapeResponse,
    ScrapeView,
};
use crate::domains::tracer::{
    TracerEngine,
    TracingQuery,
    TracingRequest,
    TracingResponse,
    TracingView,
};
use crate::metrics::MetricsSnapshot;

/// Latency charged to operations that fail validation before touching any state.
pub const REJECTED_LATENCY_MS: f64 = 4.0;

/// A domain simulator.  Each placed node owns exactly one of these; nothing else reads or writes
/// its state.
#[cfg_attr(test, automock)]
pub trait RoutingEngine: Send {
    /// Family this engine simulates.
    fn kind(&self) -> ComponentKind;

    /// Apply a (already merged and normalized) config without discarding accumulated state.
    fn reconfigure(&mut self, config: &ComponentConfig) -> EmptyResult;

    /// Move the simulation forward to `now`: fire time-checked transitions and generate the
    /// synthetic load for the elapsed interval.  `now` never goes backwards.
    fn advance(&mut self, now: SimTime) -> EmptyResult;

    /// Perform one explicit operation at the engine's current simulated time.
    fn execute(&mut self, request: &OperationRequest) -> anyhow::Result<OperationResult>;

    /// Read-only domain accessor for the detail panels.
    fn query(&self, query: &DomainQuery) -> anyhow::Result<DomainView>;

    /// Deep-copied metrics; the node id and fault fields are filled in by the registry.
    fn metrics(&self) -> MetricsSnapshot;
}

/// Construct the engine for a config.
#[must_use]
pub fn build_engine(config: &ComponentConfig, seed: u64) -> Box<dyn RoutingEngine> {
    let seed = config.seed().unwrap_or(seed);
    match config {
        ComponentConfig::ObjectStorage(c) => Box::new(ObjectStorageEngine::new(c.clone(), seed)),
        ComponentConfig::MessageBroker(c) => Box::new(MessagingEngine::new(c.clone(), seed)),
        ComponentConfig::RelationalDatabase(c) => Box::new(DatabaseEngine::new(c.clone(), seed)),
        ComponentConfig::TracingBackend(c) => Box::new(TracerEngine::new(c.clone(), seed)),
        ComponentConfig::MetricsScraper(c) => Box::new(ScrapeEngine::new(c.clone(), seed)),
        ComponentConfig::IntegrationPlatform(c) => Box::new(IntegrationEngine::new(c.clone(), seed)),
        ComponentConfig::PaymentGateway(c) => Box::new(PaymentEngine::new(c.clone(), seed)),
        ComponentConfig::RpaBot(c) => Box::new(RpaEngine::new(c.clone(), seed)),
    }
}

/// An explicit operation, routed to the engine family that understands it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationRequest {
    /// Object storage operation.
    Storage(StorageRequest),
    /// Message broker operation.
    Messaging(MessagingRequest),
    /// Relational database operation.
    Database(DatabaseRequest),
    /// Tracing backend operation.
    Tracing(TracingRequest),
    /// Metrics scraper operation.
    Scrape(ScrapeRequest),
    /// Integration platform operation.
    Integration(IntegrationRequest),
    /// Payment gateway operation.
    Payment(PaymentRequest),
    /// RPA bot operation.
    Rpa(RpaRequest),
}

impl OperationRequest {
    /// The engine family this request must be routed to.
    #[must_use]
    pub const fn family(&self) -> ComponentKind {
        match self {
            Self::Storage(_) => ComponentKind::ObjectStorage,
            Self::Messaging(_) => ComponentKind::MessageBroker,
            Self::Database(_) => ComponentKind::RelationalDatabase,
            Self::Tracing(_) => ComponentKind::TracingBackend,
            Self::Scrape(_) => ComponentKind::MetricsScraper,
            Self::Integration(_) => ComponentKind::IntegrationPlatform,
            Self::Payment(_) => ComponentKind::PaymentGateway,
            Self::Rpa(_) => ComponentKind::RpaBot,
        }
    }
}

/// Domain payload of an [`OperationResult`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponseDetail {
    /// Object storage result.
    Storage(StorageResponse),
    /// Message broker result.
    Messaging(MessagingResponse),
    /// Relational database result.
    Database(DatabaseResponse),
    /// Tracing backend result.
    Tracing(TracingResponse),
    /// Metrics scraper result.
    Scrape(ScrapeResponse),
    /// Integration platform result.
    Integration(IntegrationResponse),
    /// Payment gateway result.
    Payment(PaymentResponse),
    /// RPA bot result.
    Rpa(RpaResponse),
}

/// What an explicit operation returns: its synthetic latency plus a domain payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    /// Synthetic latency of the operation.
    pub latency_ms: f64,
    /// What the operation produced.
    pub detail: ResponseDetail,
}

/// A read-only request for one of the detail panels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DomainQuery {
    /// Object storage query.
    Storage(StorageQuery),
    /// Message broker query.
    Messaging(MessagingQuery),
    /// Relational database query.
    Database(DatabaseQuery),
    /// Tracing backend query.
    Tracing(TracingQuery),
    /// Metrics scraper query.
    Scrape(ScrapeQuery),
    /// Integration platform query.
    Integration(IntegrationQuery),
    /// Payment gateway query.
    Payment(PaymentQuery),
    /// RPA bot query.
    Rpa(RpaQuery),
}

/// Answer to a [`DomainQuery`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DomainView {
    /// Object storage view.
    Storage(StorageView),
    /// Message broker view.
    Messaging(MessagingView),
    /// Relational database view.
    Database(DatabaseView),
    /// Tracing backend view.
    Tracing(TracingView),
    /// Metrics scraper view.
    Scrape(ScrapeView),
    /// Integration platform view.
    Integration(IntegrationView),
    /// Payment gateway view.
    Payment(PaymentView),
    /// RPA bot view.
    Rpa(RpaView),
}

/// A successful typed operation: latency plus the value it produced.
#[derive(Clone, Debug, PartialEq)]
pub struct Completed<T> {
    /// Synthetic latency of the operation.
    pub latency_ms: f64,
    /// The typed result.
    pub value: T,
}

impl<T> Completed<T> {
    /// Wrap `value` with its latency.
    pub const fn new(latency_ms: f64, value: T) -> Self {
        Self { latency_ms, value }
    }

    /// Convert the value, keeping the latency.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Completed<U> {
        Completed { latency_ms: self.latency_ms, value: f(self.value) }
    }
}

/// Where and what an operation touched, for its [`OperationRecord`].
pub(crate) struct OpContext<'a> {
    pub at: SimTime,
    pub kind: OpKind,
    pub target: &'a str,
    pub size_bytes: Option<u64>,
}

impl<'a> OpContext<'a> {
    pub const fn new(at: SimTime, kind: OpKind, target: &'a str) -> Self {
        Self { at, kind, target, size_bytes: None }
    }

    pub const fn sized(mut self, size_bytes: u64) -> Self {
        self.size_bytes = Some(size_bytes);
        self
    }
}

/// Append the record for an operation's outcome and pass the outcome through.  Failed operations
/// are charged [`REJECTED_LATENCY_MS`] and never carry a size.
pub(crate) fn settle<T>(
    log: &mut OperationLog,
    ctx: &OpContext<'_>,
    outcome: anyhow::Result<Completed<T>>,
) -> anyhow::Result<Completed<T>> {
    let record = match &outcome {
        Ok(done) => {
            let record = OperationRecord::success(ctx.at, ctx.kind, done.latency_ms).with_target(ctx.target);
            match ctx.size_bytes {
                Some(size) => record.with_size(size),
                None => record,
            }
        },
        Err(_) => OperationRecord::error(ctx.at, ctx.kind, REJECTED_LATENCY_MS).with_target(ctx.target),
    };
    log.append(record);
    outcome
}

/// Pull the config for one family out of a [`ComponentConfig`], or fail with `WrongDomain`.
macro_rules! expect_variant {
    ($value:expr, $enum:ident :: $variant:ident, $what:expr) => {
        match $value {
            $enum::$variant(inner) => Ok(inner),
            other => Err($crate::errors::EngineError::wrong_domain(&format!(
                "{} got {}",
                $what,
                $crate::engine::KindName::kind_name(other)
            ))),
        }
    };
}
pub(crate) use expect_variant;

/// Debug-friendly family name of a request/query/config, used in `WrongDomain` errors.
pub(crate) trait KindName {
    fn kind_name(&self) -> &'static str;
}

impl KindName for ComponentConfig {
    fn kind_name(&self) -> &'static str {
        self.kind().as_str()
    }
}

impl KindName for OperationRequest {
    fn kind_name(&self) -> &'static str {
        self.family().as_str()
    }
}

impl KindName for DomainQuery {
    fn kind_name(&self) -> &'static str {
        match self {
            Self::Storage(_) => "storage",
            Self::Messaging(_) => "messaging",
            Self::Database(_) => "database",
            Self::Tracing(_) => "tracing",
            Self::Scrape(_) => "scrape",
            Self::Integration(_) => "integration",
            Self::Payment(_) => "payment",
            Self::Rpa(_) => "rpa",
        }
    }
}
