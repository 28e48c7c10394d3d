//! Node id → engine bookkeeping.
//!
//! The registry map is only locked long enough to insert, remove or clone out handles; all engine
//! work happens behind each node's own mutex.  The clock iterates a cloned handle list, so a node
//! removed mid-tick is simply marked retired and skipped.
use std::collections::BTreeMap;
use std::panic::{
    catch_unwind,
    AssertUnwindSafe,
};
use std::sync::atomic::{
    AtomicBool,
    AtomicI64,
    AtomicU64,
    Ordering,
};
use std::sync::Arc;

use em_core::prelude::*;
use parking_lot::{
    Mutex,
    RwLock,
};
use serde_json::Value;
use tracing::*;

use crate::config::{
    ComponentConfig,
    ComponentKind,
};
use crate::engine::{
    build_engine,
    DomainQuery,
    DomainView,
    OperationRequest,
    OperationResult,
    RoutingEngine,
};
use crate::errors::RegistryError;
use crate::load::seed_for;
use crate::metrics::MetricsSnapshot;

/// What happened to one node during a tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// The node moved to the tick's time.
    Advanced,

    /// The node was unregistered after the tick took its handle snapshot.
    Skipped,
    /// The node's advance returned an error or panicked; the fault was recorded.
    Faulted,
}

struct NodeEngine {
    id: String,
    kind: ComponentKind,
    config: Mutex<ComponentConfig>,
    engine: Mutex<Box<dyn RoutingEngine>>,

    /// Last snapshot taken after the engine moved; readers never touch the engine lock.
    published: RwLock<Arc<MetricsSnapshot>>,
    faults: AtomicU64,
    last_fault: Mutex<Option<String>>,
    retired: AtomicBool,
}

/// Shared, cheaply-cloneable reference to one node's engine.
#[derive(Clone)]
pub struct EngineHandle(Arc<NodeEngine>);

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle").field("id", &self.0.id).finish_non_exhaustive()
    }
}

impl EngineHandle {
    fn new(id: &str, config: ComponentConfig, engine: Box<dyn RoutingEngine>) -> Self {
        let kind = config.kind();
        Self(Arc::new(NodeEngine {
            id: id.into(),
            kind,
            config: Mutex::new(config),
            engine: Mutex::new(engine),
            published: RwLock::new(Arc::new(MetricsSnapshot::placeholder(id, kind))),
            faults: AtomicU64::new(0),
            last_fault: Mutex::new(None),
            retired: AtomicBool::new(false),
        }))
    }

    /// Node id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.0.id
    }

    /// Component family.
    #[must_use]
    pub fn kind(&self) -> ComponentKind {
        self.0.kind
    }

    /// Copy of the node's current (normalized) config.
    #[must_use]
    pub fn config(&self) -> ComponentConfig {
        self.0.config.lock().clone()
    }

    /// Whether the node was unregistered or replaced.
    #[must_use]
    pub fn is_retired(&self) -> bool {
        self.0.retired.load(Ordering::SeqCst)
    }

    /// Faults recorded for this node so far.
    #[must_use]
    pub fn engine_faults(&self) -> u64 {
        self.0.faults.load(Ordering::SeqCst)
    }

    /// Deep copy of the most recently published metrics.  Never waits on a tick in progress.
    #[must_use]
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        let published = Arc::clone(&*self.0.published.read());
        let mut snapshot = (*published).clone();
        snapshot.node_id.clone_from(&self.0.id);
        snapshot.engine_faults = self.engine_faults();
        snapshot.last_fault.clone_from(&*self.0.last_fault.lock());
        snapshot
    }

    /// Run one explicit operation.  A panicking engine is recorded as a fault on this node and
    /// surfaces as [`RegistryError::EngineFault`].
    pub fn execute(&self, request: &OperationRequest) -> anyhow::Result<OperationResult> {
        self.ensure_live()?;
        let mut engine = self.0.engine.lock();
        let result = catch_unwind(AssertUnwindSafe(|| engine.execute(request)))
            .unwrap_or_else(|payload| Err(self.fault_error(payload.as_ref())));
        self.publish(&**engine);
        result
    }

    /// Read-only domain query, behind the same fault boundary as [`Self::execute`].
    pub fn domain_query(&self, query: &DomainQuery) -> anyhow::Result<DomainView> {
        self.ensure_live()?;
        let engine = self.0.engine.lock();
        catch_unwind(AssertUnwindSafe(|| engine.query(query)))
            .unwrap_or_else(|payload| Err(self.fault_error(payload.as_ref())))
    }

    /// Move the engine to `now`.  Errors and panics are recorded as faults on this node only.
    pub fn advance(&self, now: SimTime) -> AdvanceOutcome {
        if self.is_retired() {
            return AdvanceOutcome::Skipped;
        }

        let mut engine = self.0.engine.lock();
        match catch_unwind(AssertUnwindSafe(|| engine.advance(now))) {
            Ok(Ok(())) => {
                self.publish(&**engine);
                AdvanceOutcome::Advanced
            },
            Ok(Err(err)) => {
                self.record_fault(&format!("advance to {now} failed: {err:#}"));
                AdvanceOutcome::Faulted
            },
            Err(payload) => {
                self.record_fault(&panic_message(payload.as_ref()));
                AdvanceOutcome::Faulted
            },
        }
    }

    fn reconfigure(&self, config: ComponentConfig) -> EmptyResult {
        let mut engine = self.0.engine.lock();
        engine.reconfigure(&config)?;
        *self.0.config.lock() = config;
        self.publish(&**engine);
        Ok(())
    }

    fn publish(&self, engine: &dyn RoutingEngine) {
        match catch_unwind(AssertUnwindSafe(|| engine.metrics())) {
            Ok(snapshot) => *self.0.published.write() = Arc::new(snapshot),
            Err(payload) => self.record_fault(&panic_message(payload.as_ref())),
        }
    }

    fn record_fault(&self, message: &str) {
        error!(node_id = %self.0.id, kind = %self.0.kind, "engine fault: {message}");
        self.0.faults.fetch_add(1, Ordering::SeqCst);
        *self.0.last_fault.lock() = Some(message.into());
    }

    fn fault_error(&self, payload: &(dyn std::any::Any + Send)) -> anyhow::Error {
        let message = panic_message(payload);
        self.record_fault(&message);
        RegistryError::engine_fault(&message)
    }

    fn ensure_live(&self) -> EmptyResult {
        if self.is_retired() {
            return Err(RegistryError::node_not_found(&self.0.id));
        }
        Ok(())
    }

    fn retire(&self) {
        self.0.retired.store(true, Ordering::SeqCst);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic: <non-string payload>".into()
    }
}

/// Every placed node's engine, keyed by node id.
#[derive(Default)]
pub struct NodeRegistry {
    nodes: RwLock<BTreeMap<String, EngineHandle>>,

    /// Latest simulated time handed out by the clock; new nodes start here.
    now: AtomicI64,
    seed: u64,
}

impl NodeRegistry {
    /// An empty registry at simulated time zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mix `seed` into every node's RNG seed, so a whole scenario can be re-rolled at once.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Latest simulated time the clock has handed out.
    #[must_use]
    pub fn now(&self) -> SimTime {
        self.now.load(Ordering::SeqCst)
    }

    pub(crate) fn set_now(&self, now: SimTime) {
        self.now.fetch_max(now, Ordering::SeqCst);
    }

    /// Create (or replace) the engine for a node from a loosely-typed form config.
    #[instrument(skip(self, config))]
    pub fn register(&self, node_id: &str, component_type: &str, config: &Value) -> anyhow::Result<EngineHandle> {
        let kind: ComponentKind = component_type.parse()?;
        Ok(self.register_config(node_id, ComponentConfig::from_value(kind, config)))
    }

    /// Create (or replace) the engine for a node from a typed config.
    pub fn register_config(&self, node_id: &str, config: ComponentConfig) -> EngineHandle {
        let config = config.normalized();
        let engine = build_engine(&config, seed_for(node_id) ^ self.seed);
        self.register_engine(node_id, config, engine)
    }

    /// Install an already-built engine.  Any previous engine under the same id is retired and its
    /// state discarded.
    pub fn register_engine(
        &self,
        node_id: &str,
        config: ComponentConfig,
        engine: Box<dyn RoutingEngine>,
    ) -> EngineHandle {
        let kind = config.kind();
        let handle = EngineHandle::new(node_id, config, engine);
        handle.advance(self.now());

        if let Some(previous) = self.nodes.write().insert(node_id.into(), handle.clone()) {
            info!(node_id, %kind, "replacing existing node");
            previous.retire();
        } else {
            info!(node_id, %kind, "registered node");
        }
        handle
    }

    /// Merge `patch` into the node's current config.  Accumulated domain state survives.
    #[instrument(skip(self, patch))]
    pub fn update_config(&self, node_id: &str, patch: &Value) -> EmptyResult {
        let handle = self.get(node_id).ok_or_else(|| RegistryError::node_not_found(node_id))?;
        let merged = handle.config().merged(patch);
        handle.reconfigure(merged)?;
        debug!(node_id, "config updated");
        Ok(())
    }

    /// Remove a node and retire its engine.
    #[instrument(skip(self))]
    pub fn unregister(&self, node_id: &str) -> EmptyResult {
        let handle = self.nodes.write().remove(node_id).ok_or_else(|| RegistryError::node_not_found(node_id))?;
        handle.retire();
        info!(node_id, "unregistered node");
        Ok(())
    }

    /// Drop every node, e.g. when the simulation is torn down.
    pub fn clear(&self) {
        let nodes = std::mem::take(&mut *self.nodes.write());
        for handle in nodes.values() {
            handle.retire();
        }
        info!(count = nodes.len(), "cleared registry");
    }

    /// Handle for `node_id`, if it is registered.
    #[must_use]
    pub fn get(&self, node_id: &str) -> Option<EngineHandle> {
        self.nodes.read().get(node_id).cloned()
    }

    /// Whether `node_id` is registered.
    #[must_use]
    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.read().contains_key(node_id)
    }

    /// Registered node ids, sorted.
    #[must_use]
    pub fn node_ids(&self) -> Vec<String> {
        self.nodes.read().keys().cloned().collect()
    }

    /// Point-in-time copy of the live handles, in node id order.
    #[must_use]
    pub fn active_handles(&self) -> Vec<EngineHandle> {
        self.nodes.read().values().cloned().collect()
    }

    /// Number of registered nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    /// Whether no node is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Run an explicit operation on a node.  A panicking engine is reported as a fault, not
    /// an unwinding caller.
    pub fn execute(&self, node_id: &str, request: &OperationRequest) -> anyhow::Result<OperationResult> {
        let handle = self.get(node_id).ok_or_else(|| RegistryError::node_not_found(node_id))?;
        handle.execute(request)
    }

    /// Answer a detail-panel query.  Panics are contained the same way as in [`Self::execute`].
    pub fn domain_query(&self, node_id: &str, query: &DomainQuery) -> anyhow::Result<DomainView> {
        let handle = self.get(node_id).ok_or_else(|| RegistryError::node_not_found(node_id))?;
        handle.domain_query(query)
    }

    /// The node's metrics, or the static placeholder the UI falls back to if it has no engine.
    #[must_use]
    pub fn metrics_snapshot_or_default(&self, node_id: &str, kind: ComponentKind) -> MetricsSnapshot {
        self.get(node_id)
            .map_or_else(|| MetricsSnapshot::placeholder(node_id, kind), |handle| handle.metrics_snapshot())
    }
}
