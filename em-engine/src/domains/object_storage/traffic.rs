//! Synthetic client traffic against the configured buckets.
use rand::Rng;
use rand_distr::{
    Distribution,
    Exp,
};

use super::*;
use crate::engine::REJECTED_LATENCY_MS;
use crate::load::chance;

/// Synthetic writes stop minting new keys once a bucket holds this many objects.
pub const SYNTHETIC_KEYS_PER_BUCKET: usize = 10_000;

impl ObjectStorageEngine {
    /// One randomly chosen client request at the current time.  Reads only target objects that are
    /// readable, so the organic error rate comes from `error_rate` alone.
    pub(super) fn synthetic_request(&mut self) {
        if self.buckets.is_empty() {
            return;
        }
        let index = self.rng.gen_range(0..self.buckets.len());
        let Some(bucket) = self.buckets.keys().nth(index).cloned() else {
            return;
        };

        let request = if chance(&mut self.rng, self.config.read_ratio) {
            match self.readable_key(&bucket) {
                Some(key) => StorageRequest::GetObject { bucket, key },
                None => StorageRequest::ListObjects { bucket, prefix: None, max_keys: Some(100) },
            }
        } else {
            let roll: f64 = self.rng.gen();
            let existing = self.random_key(&bucket);
            match existing {
                Some(key) if roll < 0.1 => StorageRequest::DeleteObject { bucket, key },
                _ if roll < 0.2 => StorageRequest::ListObjects { bucket, prefix: None, max_keys: Some(100) },
                _ => {
                    let key = self.synthetic_key(&bucket);
                    let size_bytes = self.synthetic_size();
                    StorageRequest::PutObject { bucket, key, size_bytes }
                },
            }
        };

        if chance(&mut self.rng, self.config.error_rate) {
            let target = self.target_of(&request);
            let record = OperationRecord::error(self.now, request.op_kind(), REJECTED_LATENCY_MS);
            self.log.append(record.with_target(&target));
            return;
        }
        // Failures are already in the log.
        let _ = self.apply(&request);
    }

    fn random_key(&mut self, bucket: &str) -> Option<String> {
        let objects = &self.buckets.get(bucket)?.objects;
        if objects.is_empty() {
            return None;
        }
        let index = self.rng.gen_range(0..objects.len());
        objects.keys().nth(index).cloned()
    }

    fn readable_key(&mut self, bucket: &str) -> Option<String> {
        let key = self.random_key(bucket)?;
        let obj = self.object(bucket, &key)?;
        (!obj.storage_class.is_archived() || self.is_restored(bucket, &key)).then_some(key)
    }

    /// A fresh key, or an existing one to overwrite once the bucket is full.
    fn synthetic_key(&mut self, bucket: &str) -> String {
        let full = self.buckets.get(bucket).is_some_and(|b| b.objects.len() >= SYNTHETIC_KEYS_PER_BUCKET);
        if full {
            if let Some(key) = self.random_key(bucket) {
                return key;
            }
        }
        self.next_key += 1;
        format!("synthetic/obj-{:08}", self.next_key)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    fn synthetic_size(&mut self) -> u64 {
        let mean = self.config.mean_object_size_bytes.max(1) as f64;
        match Exp::new(1.0 / mean) {
            Ok(dist) => (dist.sample(&mut self.rng).round() as u64).max(1),
            Err(_) => self.config.mean_object_size_bytes,
        }
    }
}
