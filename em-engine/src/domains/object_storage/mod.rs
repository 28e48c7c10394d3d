//! S3-style object storage: buckets of keyed objects that age through storage classes, multipart
//! uploads, and time-checked restores out of the archive tiers.
mod config;
mod lifecycle;
mod metrics;
mod model;
mod multipart;
mod restore;
mod traffic;

use std::collections::{
    BTreeMap,
    VecDeque,
};

use em_core::err_impl;
use em_core::prelude::*;
use rand::rngs::StdRng;
use serde::{
    Deserialize,
    Serialize,
};
use tracing::{
    debug,
    info,
};

pub use self::config::*;
pub use self::metrics::{
    BucketMetrics,
    StorageMetrics,
};
pub use self::model::*;
use crate::config::{
    ComponentConfig,
    ComponentKind,
};
use crate::engine::{
    expect_variant,
    settle,
    Completed,
    DomainQuery,
    DomainView,
    OpContext,
    OperationRequest,
    OperationResult,
    ResponseDetail,
    RoutingEngine,
};
use crate::errors::EngineError;
use crate::load::{
    hex_id,
    rng_from_seed,
    LoadGenerator,
};
use crate::metrics::MetricsSnapshot;

/// How many lifecycle audit records are kept.
pub const TRANSITION_HISTORY_CAPACITY: usize = 500;
/// Page size of a listing that doesn't ask for one.
pub const DEFAULT_MAX_KEYS: usize = 1000;

err_impl! {StorageError,
    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    #[error("no such key: {0}")]
    NoSuchKey(String),

    #[error("multipart upload not found: {0}")]
    UploadNotFound(String),

    #[error("part {0} was never uploaded")]
    MissingPart(u32),

    #[error("parts must be listed in strictly ascending order; part {0} is not")]
    InvalidPartOrder(u32),

    #[error("assembled object is too large: {0}")]
    EntityTooLarge(String),

    #[error("object is not in an archive storage class: {0}")]
    ObjectNotArchived(String),

    #[error("object is archived and has no completed restore: {0}")]
    InvalidObjectState(String),

    #[error("a restore is already in progress for {0}")]
    RestoreAlreadyInProgress(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),
}

/// An explicit object storage operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StorageRequest {
    /// Create or overwrite an object in the STANDARD class.
    #[serde(rename_all = "camelCase")]
    PutObject {
        /// Target bucket.
        bucket: String,
        /// Object key.
        key: String,
        /// Payload size.
        size_bytes: u64,
    },

    /// Read an object; archived objects need a completed restore.
    GetObject {
        /// Bucket holding the object.
        bucket: String,
        /// Object key.
        key: String,
    },

    /// Remove an object.  Deleting a missing key succeeds.
    DeleteObject {
        /// Bucket holding the object.
        bucket: String,
        /// Object key.
        key: String,
    },

    /// List keys in order, optionally under a prefix.
    #[serde(rename_all = "camelCase")]
    ListObjects {
        /// Bucket to list.
        bucket: String,
        /// Only keys starting with this.
        #[serde(default)]
        prefix: Option<String>,
        /// Page size; defaults to [`DEFAULT_MAX_KEYS`].
        #[serde(default)]
        max_keys: Option<usize>,
    },

    /// Start a multipart upload and get its id.
    InitiateMultipartUpload {
        /// Target bucket.
        bucket: String,
        /// Key the assembled object will get.
        key: String,
    },

    /// Upload (or replace) one part of an upload.
    #[serde(rename_all = "camelCase")]
    UploadPart {
        /// Upload the part belongs to.
        upload_id: String,
        /// Part number within the upload.
        part_number: u32,
        /// Part size.
        size_bytes: u64,
    },

    /// Assemble the listed parts into an object.
    #[serde(rename_all = "camelCase")]
    CompleteMultipartUpload {
        /// Upload to complete.
        upload_id: String,
        /// Part numbers to assemble, strictly ascending.
        parts: Vec<u32>,
    },

    /// Discard an upload and its parts.
    #[serde(rename_all = "camelCase")]
    AbortMultipartUpload {
        /// Upload to abort.
        upload_id: String,
    },

    /// Restore an archived object for a number of days.
    InitiateRestoreObject {
        /// Bucket holding the object.
        bucket: String,
        /// Object key.
        key: String,
        /// Retrieval speed.
        tier: RestoreTier,
        /// How long the restored copy stays readable.
        days: u32,
    },

    /// Check on an object's restore.
    GetRestoreStatus {
        /// Bucket holding the object.
        bucket: String,
        /// Object key.
        key: String,
    },
}

impl StorageRequest {
    /// Operation kind recorded in the log for this request.
    #[must_use]
    pub const fn op_kind(&self) -> OpKind {
        match self {
            Self::PutObject { .. } => OpKind::Put,
            Self::GetObject { .. } => OpKind::Get,
            Self::DeleteObject { .. } => OpKind::Delete,
            Self::ListObjects { .. } => OpKind::List,
            Self::InitiateMultipartUpload { .. } => OpKind::MultipartInitiate,
            Self::UploadPart { .. } => OpKind::MultipartUploadPart,
            Self::CompleteMultipartUpload { .. } => OpKind::MultipartComplete,
            Self::AbortMultipartUpload { .. } => OpKind::MultipartAbort,
            Self::InitiateRestoreObject { .. } => OpKind::RestoreInitiate,
            Self::GetRestoreStatus { .. } => OpKind::Head,
        }
    }
}

/// One entry of a listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSummary {
    /// Object key.
    pub key: String,
    /// Object size.
    pub size_bytes: u64,
    /// Current storage class.
    pub storage_class: StorageClass,
}

/// Result of a [`StorageRequest`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StorageResponse {
    /// The object written, read, or assembled.
    Object(StorageObject),

    /// Outcome of a delete.
    Deleted {
        /// Bucket the key was deleted from.
        bucket: String,
        /// Deleted key.
        key: String,
        /// Whether the key existed beforehand.
        existed: bool,
    },

    /// One page of a listing.
    Listing {
        /// Matching objects in key order.
        objects: Vec<ObjectSummary>,
        /// More keys matched than fit in the page.
        truncated: bool,
    },

    /// A multipart upload was started.
    #[serde(rename_all = "camelCase")]
    UploadInitiated {
        /// Id to upload parts against.
        upload_id: String,
    },

    /// A part was stored.
    #[serde(rename_all = "camelCase")]
    PartUploaded {
        /// Upload the part belongs to.
        upload_id: String,
        /// Part number.
        part_number: u32,
        /// Part size.
        size_bytes: u64,
    },

    /// An upload was discarded.
    #[serde(rename_all = "camelCase")]
    UploadAborted {
        /// Aborted upload.
        upload_id: String,
    },

    /// State of a restore.
    #[serde(rename_all = "camelCase")]
    Restore {
        /// Where the restore stands.
        status: RestoreStatus,
        /// When an in-progress restore finishes.
        completes_at: Option<SimTime>,
    },
}

impl StorageResponse {
    /// Payload bytes moved by the operation, for the operation log.
    #[must_use]
    pub const fn transferred_bytes(&self) -> Option<u64> {
        match self {
            Self::Object(obj) => Some(obj.size_bytes),
            Self::PartUploaded { size_bytes, .. } => Some(*size_bytes),
            _ => None,
        }
    }
}

/// Read-only object storage queries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StorageQuery {
    /// Metrics for every bucket.
    Buckets,
    /// Metrics for one bucket.
    BucketMetrics(String),
    /// One object's metadata.
    Object {
        /// Bucket holding the object.
        bucket: String,
        /// Object key.
        key: String,
    },
    /// Lifecycle audit records, newest last.
    LifecycleTransitions {
        /// Only this bucket's records.
        bucket: Option<String>,
        /// At most this many of the newest records.
        limit: Option<usize>,
    },
    /// Uploads still in progress.
    MultipartUploads {
        /// Only uploads into this bucket.
        bucket: Option<String>,
    },
    /// Every tracked restore with its current status.
    Restores,
    /// The newest operation records.
    RecentOperations {
        /// At most this many records.
        limit: usize,
    },
}

/// A restore request together with its status at query time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSummary {
    /// The original request.
    pub request: RestoreRequest,
    /// Status at the query's simulated time.
    pub status: RestoreStatus,
}

/// Answer to a [`StorageQuery`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StorageView {
    /// Every bucket's metrics.
    Buckets(Vec<BucketMetrics>),
    /// One bucket's metrics.
    Bucket(BucketMetrics),
    /// One object.
    Object(StorageObject),
    /// Lifecycle audit records.
    Transitions(Vec<LifecycleTransitionRecord>),
    /// Uploads in progress.
    Uploads(Vec<MultipartUpload>),
    /// Tracked restores.
    Restores(Vec<RestoreSummary>),
    /// Operation records.
    Operations(Vec<OperationRecord>),
}

#[derive(Clone, Debug)]
struct Bucket {
    config: BucketConfig,
    objects: BTreeMap<String, StorageObject>,
}

impl Bucket {
    fn new(config: BucketConfig) -> Self {
        Self { config, objects: BTreeMap::new() }
    }
}

/// Simulates one object storage node.
pub struct ObjectStorageEngine {
    config: ObjectStorageConfig,
    buckets: BTreeMap<String, Bucket>,
    uploads: BTreeMap<String, MultipartUpload>,
    restores: BTreeMap<(String, String), RestoreRequest>,
    transitions: VecDeque<LifecycleTransitionRecord>,
    transitions_total: u64,
    expirations_total: u64,
    aborted_uploads: u64,
    log: OperationLog,
    load: LoadGenerator,
    rng: StdRng,
    next_key: u64,
    now: SimTime,
}

impl ObjectStorageEngine {
    /// Engine with the configured buckets, all empty.
    #[must_use]
    pub fn new(config: ObjectStorageConfig, seed: u64) -> Self {
        let buckets = config.buckets.iter().map(|b| (b.name.clone(), Bucket::new(b.clone()))).collect();
        Self {
            config,
            buckets,
            uploads: BTreeMap::new(),
            restores: BTreeMap::new(),
            transitions: VecDeque::with_capacity(TRANSITION_HISTORY_CAPACITY),
            transitions_total: 0,
            expirations_total: 0,
            aborted_uploads: 0,
            log: OperationLog::default(),
            load: LoadGenerator::new(),
            rng: rng_from_seed(seed),
            next_key: 0,
            now: 0,
        }
    }

    /// The engine's simulated time.
    #[must_use]
    pub const fn now(&self) -> SimTime {
        self.now
    }

    /// Current (normalized) config.
    #[must_use]
    pub const fn config(&self) -> &ObjectStorageConfig {
        &self.config
    }

    /// Lifecycle audit trail, oldest first.
    #[must_use]
    pub fn transitions(&self) -> Vec<LifecycleTransitionRecord> {
        self.transitions.iter().cloned().collect()
    }

    /// Look up an object without logging an operation.
    #[must_use]
    pub fn object(&self, bucket: &str, key: &str) -> Option<&StorageObject> {
        self.buckets.get(bucket)?.objects.get(key)
    }

    /// Run one request at the current simulated time and log its outcome.
    pub fn apply(&mut self, request: &StorageRequest) -> anyhow::Result<Completed<StorageResponse>> {
        let target = self.target_of(request);
        let outcome = match request {
            StorageRequest::PutObject { bucket, key, size_bytes } => self.put_object(bucket, key, *size_bytes),
            StorageRequest::GetObject { bucket, key } => self.get_object(bucket, key),
            StorageRequest::DeleteObject { bucket, key } => self.delete_object(bucket, key),
            StorageRequest::ListObjects { bucket, prefix, max_keys } => {
                self.list_objects(bucket, prefix.as_deref(), max_keys.unwrap_or(DEFAULT_MAX_KEYS))
            },
            StorageRequest::InitiateMultipartUpload { bucket, key } => self.initiate_multipart_upload(bucket, key),
            StorageRequest::UploadPart { upload_id, part_number, size_bytes } => {
                self.upload_part(upload_id, *part_number, *size_bytes)
            },
            StorageRequest::CompleteMultipartUpload { upload_id, parts } => {
                self.complete_multipart_upload(upload_id, parts)
            },
            StorageRequest::AbortMultipartUpload { upload_id } => self.abort_multipart_upload(upload_id),
            StorageRequest::InitiateRestoreObject { bucket, key, tier, days } => {
                self.initiate_restore(bucket, key, *tier, *days)
            },
            StorageRequest::GetRestoreStatus { bucket, key } => self.restore_status(bucket, key),
        };

        let mut ctx = OpContext::new(self.now, request.op_kind(), &target);
        if let Some(size) = outcome.as_ref().ok().and_then(|done| done.value.transferred_bytes()) {
            ctx = ctx.sized(size);
        }
        settle(&mut self.log, &ctx, outcome)
    }

    /// Bucket an operation is attributed to.  Upload-id operations resolve through the upload;
    /// unknown ids are attributed to the id itself.
    fn target_of(&self, request: &StorageRequest) -> String {
        match request {
            StorageRequest::PutObject { bucket, .. }
            | StorageRequest::GetObject { bucket, .. }
            | StorageRequest::DeleteObject { bucket, .. }
            | StorageRequest::ListObjects { bucket, .. }
            | StorageRequest::InitiateMultipartUpload { bucket, .. }
            | StorageRequest::InitiateRestoreObject { bucket, .. }
            | StorageRequest::GetRestoreStatus { bucket, .. } => bucket.clone(),
            StorageRequest::UploadPart { upload_id, .. }
            | StorageRequest::CompleteMultipartUpload { upload_id, .. }
            | StorageRequest::AbortMultipartUpload { upload_id } => {
                self.uploads.get(upload_id).map_or_else(|| upload_id.clone(), |u| u.bucket.clone())
            },
        }
    }

    fn bucket(&self, name: &str) -> anyhow::Result<&Bucket> {
        self.buckets.get(name).ok_or_else(|| StorageError::bucket_not_found(name))
    }

    fn bucket_mut(&mut self, name: &str) -> anyhow::Result<&mut Bucket> {
        self.buckets.get_mut(name).ok_or_else(|| StorageError::bucket_not_found(name))
    }

    fn put_object(&mut self, bucket: &str, key: &str, size_bytes: u64) -> anyhow::Result<Completed<StorageResponse>> {
        let obj = self.write_object(bucket, key, size_bytes)?;
        Ok(Completed::new(put_latency_ms(size_bytes), StorageResponse::Object(obj)))
    }

    /// Create or overwrite an object in STANDARD.  Overwriting drops any restore of the old copy.
    fn write_object(&mut self, bucket: &str, key: &str, size_bytes: u64) -> anyhow::Result<StorageObject> {
        let now = self.now;
        let versioned = self.bucket(bucket)?.config.versioning;
        let version_id = versioned.then(|| hex_id(&mut self.rng));

        let mut obj = StorageObject::new(bucket, key, size_bytes, now);
        obj.version_id = version_id;
        self.bucket_mut(bucket)?.objects.insert(key.into(), obj.clone());
        self.forget_restore(bucket, key);
        Ok(obj)
    }

    fn get_object(&self, bucket: &str, key: &str) -> anyhow::Result<Completed<StorageResponse>> {
        let obj = self.bucket(bucket)?.objects.get(key).ok_or_else(|| StorageError::no_such_key(key))?;
        if obj.storage_class.is_archived() && !self.is_restored(bucket, key) {
            return Err(StorageError::invalid_object_state(&format!("{bucket}/{key}")));
        }
        Ok(Completed::new(get_latency_ms(obj.storage_class, obj.size_bytes), StorageResponse::Object(obj.clone())))
    }

    fn delete_object(&mut self, bucket: &str, key: &str) -> anyhow::Result<Completed<StorageResponse>> {
        let existed = self.bucket_mut(bucket)?.objects.remove(key).is_some();
        if existed {
            self.forget_restore(bucket, key);
        }
        Ok(Completed::new(8.0, StorageResponse::Deleted { bucket: bucket.into(), key: key.into(), existed }))
    }

    fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        max_keys: usize,
    ) -> anyhow::Result<Completed<StorageResponse>> {
        let prefix = prefix.unwrap_or_default();
        let mut matching = self
            .bucket(bucket)?
            .objects
            .range(prefix.to_owned()..)
            .take_while(|(k, _)| k.starts_with(prefix));
        let objects: Vec<_> = matching
            .by_ref()
            .take(max_keys)
            .map(|(key, obj)| ObjectSummary {
                key: key.clone(),
                size_bytes: obj.size_bytes,
                storage_class: obj.storage_class,
            })
            .collect();
        let truncated = matching.next().is_some();
        Ok(Completed::new(list_latency_ms(objects.len()), StorageResponse::Listing { objects, truncated }))
    }

    /// Apply a new config.  Buckets that are still configured keep their objects; dropped buckets
    /// lose their objects, uploads and restores.
    fn apply_config(&mut self, config: ObjectStorageConfig) {
        let mut buckets = BTreeMap::new();
        for bucket_config in &config.buckets {
            let bucket = match self.buckets.remove(&bucket_config.name) {
                Some(mut existing) => {
                    existing.config = bucket_config.clone();
                    existing
                },
                None => {
                    info!(bucket = %bucket_config.name, "bucket created");
                    Bucket::new(bucket_config.clone())
                },
            };
            buckets.insert(bucket_config.name.clone(), bucket);
        }
        for name in self.buckets.keys() {
            info!(bucket = %name, "bucket removed from config; dropping its objects");
        }

        self.uploads.retain(|_, u| buckets.contains_key(&u.bucket));
        self.restores.retain(|(bucket, _), _| buckets.contains_key(bucket));
        self.buckets = buckets;
        self.config = config;
    }

    fn total_objects(&self) -> u64 {
        self.buckets.values().map(|b| b.objects.len() as u64).sum()
    }

    fn total_bytes(&self) -> u64 {
        self.buckets.values().flat_map(|b| b.objects.values()).fold(0, |acc, o| acc.saturating_add(o.size_bytes))
    }

    fn storage_query(&self, query: &StorageQuery) -> anyhow::Result<StorageView> {
        let view = match query {
            StorageQuery::Buckets => {
                StorageView::Buckets(self.buckets.keys().map(|name| self.bucket_metrics(name)).collect())
            },
            StorageQuery::BucketMetrics(name) => {
                self.bucket(name)?;
                StorageView::Bucket(self.bucket_metrics(name))
            },
            StorageQuery::Object { bucket, key } => StorageView::Object(
                self.bucket(bucket)?.objects.get(key).cloned().ok_or_else(|| StorageError::no_such_key(key))?,
            ),
            StorageQuery::LifecycleTransitions { bucket, limit } => {
                let matching: Vec<_> = self
                    .transitions
                    .iter()
                    .filter(|r| bucket.as_ref().map_or(true, |b| &r.bucket == b))
                    .cloned()
                    .collect();
                let skip = limit.map_or(0, |l| matching.len().saturating_sub(l));
                StorageView::Transitions(matching.into_iter().skip(skip).collect())
            },
            StorageQuery::MultipartUploads { bucket } => StorageView::Uploads(
                self.uploads
                    .values()
                    .filter(|u| bucket.as_ref().map_or(true, |b| &u.bucket == b))
                    .cloned()
                    .collect(),
            ),
            StorageQuery::Restores => StorageView::Restores(
                self.restores
                    .values()
                    .map(|r| RestoreSummary { request: r.clone(), status: r.status_at(self.now) })
                    .collect(),
            ),
            StorageQuery::RecentOperations { limit } => StorageView::Operations(self.log.recent(*limit)),
        };
        Ok(view)
    }
}

impl RoutingEngine for ObjectStorageEngine {
    fn kind(&self) -> ComponentKind {
        KIND
    }

    fn reconfigure(&mut self, config: &ComponentConfig) -> EmptyResult {
        let config = expect_variant!(config, ComponentConfig::ObjectStorage, "object storage config")?;
        self.apply_config(config.clone());
        Ok(())
    }

    fn advance(&mut self, now: SimTime) -> EmptyResult {
        if now < self.now {
            debug!(now, current = self.now, "ignoring advance into the past");
            return Ok(());
        }

        for at in self.load.due(now, self.config.ops_per_sec) {
            self.now = at;
            self.synthetic_request();
        }
        self.now = now;
        self.sweep_lifecycle();
        Ok(())
    }

    fn execute(&mut self, request: &OperationRequest) -> anyhow::Result<OperationResult> {
        let request = expect_variant!(request, OperationRequest::Storage, "object storage request")?;
        let done = self.apply(request)?;
        Ok(OperationResult { latency_ms: done.latency_ms, detail: ResponseDetail::Storage(done.value) })
    }

    fn query(&self, query: &DomainQuery) -> anyhow::Result<DomainView> {
        match query {
            DomainQuery::Storage(q) => Ok(DomainView::Storage(self.storage_query(q)?)),
            other => Err(EngineError::unsupported_query(&format!("{other:?}"))),
        }
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.snapshot()
    }
}

#[cfg(test)]
mod tests;
