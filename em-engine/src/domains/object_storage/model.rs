//! Object storage entities.
use std::collections::BTreeMap;
use std::fmt;

use em_core::time::{
    SimTime,
    HOUR,
    MINUTE,
};
use serde::{
    Deserialize,
    Serialize,
};

use crate::config::ComponentKind;

/// Bytes per simulated millisecond of transfer.
pub const TRANSFER_BYTES_PER_MS: f64 = 100_000.0;
/// Fixed part of a write's latency.
pub const PUT_BASE_LATENCY_MS: f64 = 15.0;

/// Extra latency charged by `CompleteMultipartUpload` for assembling the parts.
pub const MULTIPART_ASSEMBLY_MS: f64 = 250.0;

/// Storage tiers, in lifecycle order.  Transitions only ever move to [`StorageClass::next`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageClass {
    /// Frequently accessed data.
    Standard,
    /// Infrequent access.
    StandardIa,
    /// Archive; reads need a restore.
    Glacier,
    /// Deepest archive; reads need a restore.
    DeepArchive,
}

impl StorageClass {
    /// Every class, in lifecycle order.
    pub const ALL: [Self; 4] = [Self::Standard, Self::StandardIa, Self::Glacier, Self::DeepArchive];

    /// The class a lifecycle transition moves to, or `None` at the end of the chain.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Standard => Some(Self::StandardIa),
            Self::StandardIa => Some(Self::Glacier),
            Self::Glacier => Some(Self::DeepArchive),
            Self::DeepArchive => None,
        }
    }

    /// Archived objects can't be read without a restore.
    #[must_use]
    pub const fn is_archived(self) -> bool {
        matches!(self, Self::Glacier | Self::DeepArchive)
    }

    /// Latency before the first byte of a read.
    #[must_use]
    pub const fn first_byte_latency_ms(self) -> f64 {
        match self {
            Self::Standard => 10.0,
            Self::StandardIa => 25.0,
            Self::Glacier => 40.0,
            Self::DeepArchive => 60.0,
        }
    }

    /// Wire name, e.g. `STANDARD_IA`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "STANDARD",
            Self::StandardIa => "STANDARD_IA",
            Self::Glacier => "GLACIER",
            Self::DeepArchive => "DEEP_ARCHIVE",
        }
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Object metadata; payloads aren't stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageObject {
    /// Bucket holding the object.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Object size.
    pub size_bytes: u64,
    /// Current storage class.
    pub storage_class: StorageClass,
    /// When the object was written.
    pub created_at: SimTime,

    /// When the object entered its current storage class; lifecycle age is measured from here.
    pub last_transition_at: SimTime,

    /// Set on every write to a versioned bucket.
    pub version_id: Option<String>,

    /// Every class the object has been in, oldest first.
    pub class_history: Vec<StorageClass>,
}

impl StorageObject {
    /// A fresh STANDARD object written at `now`.
    #[must_use]
    pub fn new(bucket: &str, key: &str, size_bytes: u64, now: SimTime) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            size_bytes,
            storage_class: StorageClass::Standard,
            created_at: now,
            last_transition_at: now,
            version_id: None,
            class_history: vec![StorageClass::Standard],
        }
    }

    pub(super) fn transition_to(&mut self, class: StorageClass, now: SimTime) {
        self.storage_class = class;
        self.last_transition_at = now;
        self.class_history.push(class);
    }
}

/// What a lifecycle sweep did to an object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleAction {
    /// Moved to the next storage class.
    Transition,
    /// Deleted for age.
    Expiration,
}

/// Audit entry written by the lifecycle sweep.  `to_class` is `None` for expirations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleTransitionRecord {
    /// Bucket holding the object.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Class before the sweep.
    pub from_class: StorageClass,
    /// Class after the sweep.
    pub to_class: Option<StorageClass>,
    /// Transition or expiration.
    pub action: LifecycleAction,
    /// When the sweep acted.
    pub timestamp: SimTime,
}

/// A multipart upload in progress.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultipartUpload {
    /// Upload id handed out on initiation.
    pub upload_id: String,
    /// Target bucket.
    pub bucket: String,
    /// Key the assembled object will get.
    pub key: String,
    /// When the upload was started.
    pub initiated_at: SimTime,

    /// Part number to part size; re-uploading a part overwrites it.
    pub parts: BTreeMap<u32, u64>,
}

impl MultipartUpload {
    /// Bytes across all uploaded parts.
    #[must_use]
    pub fn uploaded_bytes(&self) -> u64 {
        self.parts.values().fold(0, |acc, size| acc.saturating_add(*size))
    }
}

/// Restore speed; faster tiers aren't offered for every archive class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RestoreTier {
    /// Minutes, Glacier only.
    Expedited,
    /// Hours.
    Standard,
    /// Cheapest and slowest.
    Bulk,
}

impl RestoreTier {
    /// How long a restore from `class` takes at this tier; `None` if the class doesn't offer it.
    #[must_use]
    pub const fn delay(self, class: StorageClass) -> Option<SimTime> {
        match (class, self) {
            (StorageClass::Glacier, Self::Expedited) => Some(5 * MINUTE),
            (StorageClass::Glacier, Self::Standard) => Some(4 * HOUR),
            (StorageClass::Glacier, Self::Bulk) => Some(12 * HOUR),
            (StorageClass::DeepArchive, Self::Standard) => Some(12 * HOUR),
            (StorageClass::DeepArchive, Self::Bulk) => Some(48 * HOUR),
            _ => None,
        }
    }
}

/// Where a restore stands at a given time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestoreStatus {
    /// No restore was ever requested for the object.
    NotRequested,
    /// Requested, not yet readable.
    InProgress,
    /// The restored copy is readable.
    Completed,

    /// The restored copy outlived its `days` and was removed.
    Expired,

    /// The object was deleted while the restore was in progress.
    Failed,
}

/// A pending or finished restore.  Nothing fires when `completes_at` passes: the status is worked
/// out from the timestamps whenever someone asks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreRequest {
    /// Bucket holding the object.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Retrieval tier.
    pub tier: RestoreTier,
    /// Days the restored copy stays readable.
    pub days: u32,
    /// When the restore was requested.
    pub requested_at: SimTime,
    /// When the copy becomes readable.
    pub completes_at: SimTime,
    /// When the copy is removed again.
    pub expires_at: SimTime,
    /// The object was deleted before the restore completed.
    pub failed: bool,
}

impl RestoreRequest {
    /// Status at `now`, derived from the timestamps.
    #[must_use]
    pub const fn status_at(&self, now: SimTime) -> RestoreStatus {
        if self.failed {
            RestoreStatus::Failed
        } else if now < self.completes_at {
            RestoreStatus::InProgress
        } else if now < self.expires_at {
            RestoreStatus::Completed
        } else {
            RestoreStatus::Expired
        }
    }
}

/// Latency of writing `size_bytes` in one request.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn put_latency_ms(size_bytes: u64) -> f64 {
    PUT_BASE_LATENCY_MS + size_bytes as f64 / TRANSFER_BYTES_PER_MS
}

/// Latency of reading `size_bytes` from `class`.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn get_latency_ms(class: StorageClass, size_bytes: u64) -> f64 {
    class.first_byte_latency_ms() + size_bytes as f64 / TRANSFER_BYTES_PER_MS
}

/// Latency of a listing that returns `returned` keys.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn list_latency_ms(returned: usize) -> f64 {
    20.0 + returned as f64 * 0.01
}

pub(super) const KIND: ComponentKind = ComponentKind::ObjectStorage;
