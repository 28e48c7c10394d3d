use std::collections::HashSet;

use derive_setters::Setters;
use serde::{
    Deserialize,
    Serialize,
};
use tracing::warn;

use crate::config::sanitize_f64;

/// Request capacity of one bucket, in operations per second.
pub const DEFAULT_BUCKET_OPS_CAPACITY: f64 = 3500.0;
/// Total capacity the storage utilization is measured against (5 TiB).
pub const DEFAULT_STORAGE_CAPACITY_BYTES: u64 = 5 * (1 << 40);
/// Lifecycle transition age used when a rule leaves it at 0.
pub const DEFAULT_TRANSITION_DAYS: u32 = 30;
/// Bucket created when the config names none.
pub const DEFAULT_BUCKET_NAME: &str = "default-bucket";

/// Object storage node config.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Setters)]
#[serde(default, rename_all = "camelCase")]
pub struct ObjectStorageConfig {
    /// Buckets to create; empty and duplicate names are dropped.
    pub buckets: Vec<BucketConfig>,

    /// Synthetic request rate across all buckets.
    pub ops_per_sec: f64,

    /// Fraction of synthetic requests that are reads.
    pub read_ratio: f64,

    /// Fraction of synthetic requests that fail with an internal error.
    pub error_rate: f64,
    /// Mean size of synthetic writes.
    pub mean_object_size_bytes: u64,
    /// Per-bucket request capacity (ops/s) for the utilization ratio.
    pub bucket_ops_capacity: f64,
    /// Total capacity for the storage utilization ratio.
    pub storage_capacity_bytes: u64,

    /// Incomplete multipart uploads older than this are aborted by the lifecycle sweep.
    pub abort_incomplete_uploads_after_days: u32,
    /// Overrides the node's id-derived RNG seed.
    pub seed: Option<u64>,
}

impl Default for ObjectStorageConfig {
    fn default() -> Self {
        Self {
            buckets: vec![BucketConfig::named(DEFAULT_BUCKET_NAME)],
            ops_per_sec: 5.0,
            read_ratio: 0.7,
            error_rate: 0.002,
            mean_object_size_bytes: 256 * 1024,
            bucket_ops_capacity: DEFAULT_BUCKET_OPS_CAPACITY,
            storage_capacity_bytes: DEFAULT_STORAGE_CAPACITY_BYTES,
            abort_incomplete_uploads_after_days: 7,
            seed: None,
        }
    }
}

impl ObjectStorageConfig {
    pub(crate) fn normalize(&mut self) {
        let defaults = Self::default();
        sanitize_f64(&mut self.ops_per_sec, 0.0, 100_000.0, defaults.ops_per_sec, "opsPerSec");
        sanitize_f64(&mut self.read_ratio, 0.0, 1.0, defaults.read_ratio, "readRatio");
        sanitize_f64(&mut self.error_rate, 0.0, 1.0, defaults.error_rate, "errorRate");
        sanitize_f64(
            &mut self.bucket_ops_capacity,
            f64::MIN_POSITIVE,
            f64::MAX,
            defaults.bucket_ops_capacity,
            "bucketOpsCapacity",
        );
        if self.mean_object_size_bytes == 0 {
            self.mean_object_size_bytes = defaults.mean_object_size_bytes;
        }
        if self.storage_capacity_bytes == 0 {
            self.storage_capacity_bytes = defaults.storage_capacity_bytes;
        }
        if self.abort_incomplete_uploads_after_days == 0 {
            self.abort_incomplete_uploads_after_days = defaults.abort_incomplete_uploads_after_days;
        }

        let mut seen = HashSet::new();
        self.buckets.retain(|b| {
            let keep = !b.name.trim().is_empty() && seen.insert(b.name.clone());
            if !keep {
                warn!(bucket = %b.name, "dropping empty or duplicate bucket name");
            }
            keep
        });
        for bucket in &mut self.buckets {
            if let Some(rule) = &mut bucket.lifecycle {
                if rule.transition_after_days == 0 {
                    rule.transition_after_days = DEFAULT_TRANSITION_DAYS;
                }
            }
        }
    }
}

/// One bucket.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, Setters)]
#[serde(default, rename_all = "camelCase")]
#[setters(into)]
pub struct BucketConfig {
    /// Bucket name, unique per node.
    pub name: String,
    /// Region label shown in the detail panel.
    pub region: String,
    /// Assign a version id on every write.
    pub versioning: bool,
    /// Storage-class aging policy; no aging without one.
    pub lifecycle: Option<LifecycleRule>,
}

impl BucketConfig {
    /// A bucket called `name` in `us-east-1`, unversioned and without lifecycle.
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self { name: name.into(), region: "us-east-1".into(), ..Default::default() }
    }
}

/// Bucket lifecycle policy.  An object moves one storage class forward each time it has spent
/// `transition_after_days` in its current class, and is removed outright once it is
/// `expire_after_days` old (if set).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LifecycleRule {
    /// Days an object spends in a class before moving to the next one.
    pub transition_after_days: u32,
    /// Age in days at which objects are deleted.
    pub expire_after_days: Option<u32>,
}

impl Default for LifecycleRule {
    fn default() -> Self {
        Self { transition_after_days: DEFAULT_TRANSITION_DAYS, expire_after_days: None }
    }
}
