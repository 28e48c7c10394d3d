//! Component configuration: one concrete struct per family, wrapped in a variant tagged by
//! `componentType`.
//!
//! Configs arrive from the form editors as loosely-typed JSON.  They are never rejected wholesale:
//! each top-level field is merged on its own, and a field that doesn't deserialize is dropped (with
//! a warning) so the previous or default value wins.
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use derive_setters::Setters;
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::{
    Map,
    Value,
};
use tracing::warn;

use crate::domains::database::DatabaseConfig;
use crate::domains::integration::IntegrationConfig;
use crate::domains::messaging::MessagingConfig;
use crate::domains::object_storage::ObjectStorageConfig;
use crate::domains::payment::PaymentConfig;
use crate::domains::rpa::RpaConfig;
use crate::domains::scrape::ScrapeConfig;
use crate::domains::tracer::TracerConfig;
use crate::errors::RegistryError;

const TAG: &str = "componentType";

/// The component families the engine can simulate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComponentKind {
    /// S3-style object store.
    ObjectStorage,
    /// Partitioned message broker.
    MessageBroker,
    /// Relational database.
    RelationalDatabase,
    /// Distributed-tracing backend.
    TracingBackend,
    /// Metrics scraper.
    MetricsScraper,
    /// Integration platform running message flows.
    IntegrationPlatform,
    /// Payment gateway.
    PaymentGateway,
    /// RPA bot runner.
    RpaBot,
}

impl ComponentKind {
    /// Every family, in palette order.
    pub const ALL: [Self; 8] = [
        Self::ObjectStorage,
        Self::MessageBroker,
        Self::RelationalDatabase,
        Self::TracingBackend,
        Self::MetricsScraper,
        Self::IntegrationPlatform,
        Self::PaymentGateway,
        Self::RpaBot,
    ];

    /// Canonical (kebab-case) name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ObjectStorage => "object-storage",
            Self::MessageBroker => "message-broker",
            Self::RelationalDatabase => "relational-database",
            Self::TracingBackend => "tracing-backend",
            Self::MetricsScraper => "metrics-scraper",
            Self::IntegrationPlatform => "integration-platform",
            Self::PaymentGateway => "payment-gateway",
            Self::RpaBot => "rpa-bot",
        }
    }

    /// Product names the diagram palette uses for each family.
    #[must_use]
    pub const fn aliases(self) -> &'static [&'static str] {
        match self {
            Self::ObjectStorage => &["s3", "minio", "gcs", "blob-storage", "bucket"],
            Self::MessageBroker => &["kafka", "rabbitmq", "sqs", "queue", "pubsub"],
            Self::RelationalDatabase => &["postgres", "postgresql", "mysql", "database", "rds"],
            Self::TracingBackend => &["jaeger", "zipkin", "tempo", "tracing"],
            Self::MetricsScraper => &["prometheus", "scrape-target", "scraper"],
            Self::IntegrationPlatform => &["mulesoft", "integration", "esb"],
            Self::PaymentGateway => &["stripe", "payment", "payments"],
            Self::RpaBot => &["rpa", "uipath", "bot"],
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComponentKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == needle || k.aliases().contains(&needle.as_str()))
            .ok_or_else(|| RegistryError::unsupported_component_kind(s))
    }
}

/// A node's config, tagged by `componentType`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "componentType", rename_all = "kebab-case")]
pub enum ComponentConfig {
    /// Object storage config.
    ObjectStorage(ObjectStorageConfig),
    /// Message broker config.
    MessageBroker(MessagingConfig),
    /// Relational database config.
    RelationalDatabase(DatabaseConfig),
    /// Tracing backend config.
    TracingBackend(TracerConfig),
    /// Metrics scraper config.
    MetricsScraper(ScrapeConfig),
    /// Integration platform config.
    IntegrationPlatform(IntegrationConfig),
    /// Payment gateway config.
    PaymentGateway(PaymentConfig),
    /// RPA bot config.
    RpaBot(RpaConfig),
}

impl ComponentConfig {
    /// Defaults for `kind`.
    #[must_use]
    pub fn default_for(kind: ComponentKind) -> Self {
        match kind {
            ComponentKind::ObjectStorage => Self::ObjectStorage(ObjectStorageConfig::default()),
            ComponentKind::MessageBroker => Self::MessageBroker(MessagingConfig::default()),
            ComponentKind::RelationalDatabase => Self::RelationalDatabase(DatabaseConfig::default()),
            ComponentKind::TracingBackend => Self::TracingBackend(TracerConfig::default()),
            ComponentKind::MetricsScraper => Self::MetricsScraper(ScrapeConfig::default()),
            ComponentKind::IntegrationPlatform => Self::IntegrationPlatform(IntegrationConfig::default()),
            ComponentKind::PaymentGateway => Self::PaymentGateway(PaymentConfig::default()),
            ComponentKind::RpaBot => Self::RpaBot(RpaConfig::default()),
        }
    }

    /// Family this config belongs to.
    #[must_use]
    pub const fn kind(&self) -> ComponentKind {
        match self {
            Self::ObjectStorage(_) => ComponentKind::ObjectStorage,
            Self::MessageBroker(_) => ComponentKind::MessageBroker,
            Self::RelationalDatabase(_) => ComponentKind::RelationalDatabase,
            Self::TracingBackend(_) => ComponentKind::TracingBackend,
            Self::MetricsScraper(_) => ComponentKind::MetricsScraper,
            Self::IntegrationPlatform(_) => ComponentKind::IntegrationPlatform,
            Self::PaymentGateway(_) => ComponentKind::PaymentGateway,
            Self::RpaBot(_) => ComponentKind::RpaBot,
        }
    }

    /// Build a config for `kind` from a raw form blob, falling back to defaults field by field.
    #[must_use]
    pub fn from_value(kind: ComponentKind, raw: &Value) -> Self {
        Self::default_for(kind).merged(raw)
    }

    /// Merge a partial config on top of this one.  The component type can't be changed this way;
    /// a `componentType` key in the patch is ignored.
    #[must_use]
    pub fn merged(&self, patch: &Value) -> Self {
        let mut current = self.clone();
        let fields = match patch {
            Value::Object(fields) => fields,
            Value::Null => return current.normalized(),
            other => {
                warn!(kind = %self.kind(), patch = %other, "config patch is not an object; ignoring");
                return current.normalized();
            },
        };

        for (key, value) in fields {
            if key == TAG {
                continue;
            }

            let mut doc = match serde_json::to_value(&current) {
                Ok(doc) => doc,
                Err(err) => {
                    warn!(kind = %self.kind(), %err, "could not serialize current config");
                    break;
                },
            };
            let mut field_patch = Map::new();
            field_patch.insert(key.clone(), value.clone());
            merge_patch(&mut doc, &Value::Object(field_patch));

            match serde_json::from_value::<Self>(doc) {
                Ok(next) => current = next,
                Err(err) => {
                    warn!(kind = %self.kind(), field = %key, %err, "malformed config field; keeping previous value");
                },
            }
        }

        current.normalized()
    }

    /// Clamp out-of-range values back to their documented defaults.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        match &mut self {
            Self::ObjectStorage(c) => c.normalize(),
            Self::MessageBroker(c) => c.normalize(),
            Self::RelationalDatabase(c) => c.normalize(),
            Self::TracingBackend(c) => c.normalize(),
            Self::MetricsScraper(c) => c.normalize(),
            Self::IntegrationPlatform(c) => c.normalize(),
            Self::PaymentGateway(c) => c.normalize(),
            Self::RpaBot(c) => c.normalize(),
        }
        self
    }

    /// Explicit RNG seed, if the config carries one.
    #[must_use]
    pub const fn seed(&self) -> Option<u64> {
        match self {
            Self::ObjectStorage(c) => c.seed,
            Self::MessageBroker(c) => c.seed,
            Self::RelationalDatabase(c) => c.seed,
            Self::TracingBackend(c) => c.seed,
            Self::MetricsScraper(c) => c.seed,
            Self::IntegrationPlatform(c) => c.seed,
            Self::PaymentGateway(c) => c.seed,
            Self::RpaBot(c) => c.seed,
        }
    }
}

/// RFC 7386 JSON merge patch: objects merge recursively, `null` deletes, anything else replaces.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_fields) = patch else {
        *target = patch.clone();
        return;
    };

    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_fields) = target {
        for (key, value) in patch_fields {
            if value.is_null() {
                target_fields.remove(key);
            } else {
                merge_patch(target_fields.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

/// Replace a non-finite or out-of-range float with its default.
pub(crate) fn sanitize_f64(value: &mut f64, min: f64, max: f64, default: f64, field: &str) {
    if !value.is_finite() || *value < min || *value > max {
        warn!(field, value = *value, default, "config value out of range; using default");
        *value = default;
    }
}

/// How fast the simulation clock runs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Setters)]
#[serde(default, rename_all = "camelCase")]
pub struct ClockConfig {
    /// Wall-clock time between ticks when the clock runs in real time.
    pub tick_period_ms: u64,

    /// Simulated milliseconds per wall-clock millisecond.
    pub time_scale: f64,
}

impl ClockConfig {
    /// Wall-clock time between ticks, at least 1 ms.
    #[must_use]
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms.max(1))
    }

    /// Simulated time covered by one tick.
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    #[must_use]
    pub fn sim_step(&self) -> em_core::time::SimTime {
        let scale = if self.time_scale.is_finite() && self.time_scale > 0.0 { self.time_scale } else { 1.0 };
        ((self.tick_period_ms.max(1) as f64) * scale).round() as em_core::time::SimTime
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self { tick_period_ms: 1000, time_scale: 1.0 }
    }
}

#[cfg(test)]
mod tests;
