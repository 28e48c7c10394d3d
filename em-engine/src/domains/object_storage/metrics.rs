use em_core::stats;
use serde::{
    Deserialize,
    Serialize,
};

use super::*;
use crate::metrics::DomainMetrics;

/// Per-bucket part of the storage metrics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketMetrics {
    /// Bucket name.
    pub name: String,
    /// Region label.
    pub region: String,
    /// Whether versioning is on.
    pub versioning: bool,
    /// Objects in the bucket.
    pub object_count: u64,
    /// Bytes stored in the bucket.
    pub total_bytes: u64,
    /// Object count per storage class.
    pub objects_by_class: BTreeMap<StorageClass, u64>,
    /// Bytes per storage class.
    pub bytes_by_class: BTreeMap<StorageClass, u64>,

    /// Operations still in the log that touched this bucket.
    pub operations: OperationSummary,

    /// Request throughput against one bucket's capacity.
    pub utilization: f64,
}

/// Object storage part of a node's metrics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageMetrics {
    /// Per-bucket breakdown.
    pub buckets: BTreeMap<String, BucketMetrics>,
    /// Object count per storage class, across buckets.
    pub objects_by_class: BTreeMap<StorageClass, u64>,
    /// Lifecycle transitions performed so far.
    pub lifecycle_transitions: u64,
    /// Objects removed by lifecycle expiration so far.
    pub expirations: u64,
    /// Multipart uploads in progress.
    pub active_uploads: u64,
    /// Uploads aborted, explicitly or by the lifecycle sweep.
    pub aborted_uploads: u64,
    /// Restores not yet complete.
    pub restores_in_progress: u64,
    /// Restores whose copy is currently readable.
    pub restores_completed: u64,
}

impl ObjectStorageEngine {
    pub(super) fn bucket_metrics(&self, name: &str) -> BucketMetrics {
        let Some(bucket) = self.buckets.get(name) else {
            return BucketMetrics { name: name.into(), ..Default::default() };
        };

        let mut objects_by_class = BTreeMap::new();
        let mut bytes_by_class = BTreeMap::new();
        for obj in bucket.objects.values() {
            *objects_by_class.entry(obj.storage_class).or_insert(0) += 1;
            let bytes = bytes_by_class.entry(obj.storage_class).or_insert(0_u64);
            *bytes = bytes.saturating_add(obj.size_bytes);
        }
        let operations = self.log.summarize_target(name, self.now);
        let utilization = stats::utilization(operations.throughput, self.config.bucket_ops_capacity);

        BucketMetrics {
            name: name.into(),
            region: bucket.config.region.clone(),
            versioning: bucket.config.versioning,
            object_count: bucket.objects.len() as u64,
            total_bytes: bytes_by_class.values().fold(0, |acc, b| acc.saturating_add(*b)),
            objects_by_class,
            bytes_by_class,
            operations,
            utilization,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub(super) fn snapshot(&self) -> MetricsSnapshot {
        let buckets: BTreeMap<_, _> =
            self.buckets.keys().map(|name| (name.clone(), self.bucket_metrics(name))).collect();
        let mut objects_by_class = BTreeMap::new();
        for metrics in buckets.values() {
            for (class, count) in &metrics.objects_by_class {
                *objects_by_class.entry(*class).or_insert(0) += count;
            }
        }

        let domain = StorageMetrics {
            buckets,
            objects_by_class,
            lifecycle_transitions: self.transitions_total,
            expirations: self.expirations_total,
            active_uploads: self.uploads.len() as u64,
            aborted_uploads: self.aborted_uploads,
            restores_in_progress: self.restores_with_status(RestoreStatus::InProgress),
            restores_completed: self.restores_with_status(RestoreStatus::Completed),
        };

        let snapshot = MetricsSnapshot::from_log(KIND, &self.log, self.now);
        let request_capacity = self.config.bucket_ops_capacity * self.buckets.len().max(1) as f64;
        let requests = stats::utilization(snapshot.operations.throughput, request_capacity);
        let storage = stats::utilization(self.total_bytes() as f64, self.config.storage_capacity_bytes as f64);

        snapshot
            .with_count("buckets", self.buckets.len() as u64)
            .with_count("objects", self.total_objects())
            .with_count("multipartUploads", domain.active_uploads)
            .with_count("restoresInProgress", domain.restores_in_progress)
            .with_utilization("requests", requests)
            .with_utilization("storage", storage)
            .with_domain(DomainMetrics::Storage(domain))
    }
}
