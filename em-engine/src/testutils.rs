use serde_json::json;

use crate::config::{
    ComponentConfig,
    ComponentKind,
};
use crate::engine::MockRoutingEngine;
use crate::metrics::MetricsSnapshot;
use crate::registry::NodeRegistry;

/// A mock engine that answers `kind` and `metrics`; callers add the `advance` behaviour they need.
pub(crate) fn mock_engine(kind: ComponentKind) -> MockRoutingEngine {
    let mut engine = MockRoutingEngine::new();
    engine.expect_kind().return_const(kind);
    engine.expect_metrics().returning(move || MetricsSnapshot::placeholder("", kind));
    engine
}

/// Database with synthetic load turned off, so the only rows that change are the ones a test
/// writes.
pub(crate) fn quiet_database(registry: &NodeRegistry, node_id: &str) {
    registry
        .register(node_id, "postgres", &json!({"queriesPerSec": 0, "tables": [{"name": "users", "rows": 10}]}))
        .unwrap();
}

pub(crate) fn default_config(kind: ComponentKind) -> ComponentConfig {
    ComponentConfig::default_for(kind)
}
