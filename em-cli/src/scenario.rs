//! YAML scenario files: a clock config, an optional seed, and the nodes to place.
//!
//! ```yaml
//! clock:
//!   tickPeriodMs: 1000
//!   timeScale: 60
//! seed: 42
//! nodes:
//!   - id: photos
//!     componentType: s3
//!     config:
//!       opsPerSec: 20
//! ```
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::Context;
use em_core::errors::bail;
use em_core::prelude::*;
use em_engine::{
    ClockConfig,
    ComponentConfig,
    ComponentKind,
    NodeRegistry,
};
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Scenario {
    pub clock: ClockConfig,
    pub seed: Option<u64>,
    pub nodes: Vec<NodeSpec>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    pub id: String,
    pub component_type: String,
    #[serde(default)]
    pub config: Value,
}

impl Scenario {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path).with_context(|| format!("reading scenario {}", path.display()))?;
        Self::from_yaml(&contents).with_context(|| format!("parsing scenario {}", path.display()))
    }

    pub fn from_yaml(contents: &str) -> anyhow::Result<Self> {
        let scenario: Self = serde_yaml::from_str(contents)?;
        scenario.check()?;
        Ok(scenario)
    }

    /// Node ids must be unique and non-empty, and every component type must resolve.
    fn check(&self) -> EmptyResult {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.id.trim().is_empty() {
                bail!("node with empty id");
            }
            if !seen.insert(node.id.as_str()) {
                bail!("duplicate node id: {}", node.id);
            }
            node.kind().with_context(|| format!("node {}", node.id))?;
        }
        Ok(())
    }

    /// The normalized config each node would be registered with.
    pub fn resolved_configs(&self) -> anyhow::Result<Vec<(String, ComponentConfig)>> {
        self.nodes
            .iter()
            .map(|node| Ok((node.id.clone(), ComponentConfig::from_value(node.kind()?, &node.config))))
            .collect()
    }

    pub fn build_registry(&self) -> anyhow::Result<NodeRegistry> {
        let registry = NodeRegistry::new().with_seed(self.seed.unwrap_or_default());
        for node in &self.nodes {
            registry.register(&node.id, &node.component_type, &node.config)?;
        }
        Ok(registry)
    }
}

impl NodeSpec {
    pub fn kind(&self) -> anyhow::Result<ComponentKind> {
        self.component_type.parse()
    }
}
