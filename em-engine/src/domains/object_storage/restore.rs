use em_core::time::{
    days,
    SimTime,
};
use tracing::debug;

use super::*;

/// How long a finished restore of a deleted object stays visible before it is forgotten.
const FAILED_RESTORE_RETENTION: SimTime = days(1);

impl ObjectStorageEngine {
    pub(super) fn initiate_restore(
        &mut self,
        bucket: &str,
        key: &str,
        tier: RestoreTier,
        restore_days: u32,
    ) -> anyhow::Result<Completed<StorageResponse>> {
        let now = self.now;
        let obj = self.bucket(bucket)?.objects.get(key).ok_or_else(|| StorageError::no_such_key(key))?;
        if !obj.storage_class.is_archived() {
            return Err(StorageError::object_not_archived(&format!("{bucket}/{key} is {}", obj.storage_class)));
        }
        let delay = tier.delay(obj.storage_class).ok_or_else(|| {
            StorageError::invalid_transition(&format!("{tier:?} restores are not offered for {}", obj.storage_class))
        })?;
        let restore_days = restore_days.max(1);
        let lifetime = days(i64::from(restore_days));

        let slot = (bucket.to_owned(), key.to_owned());
        if let Some(existing) = self.restores.get_mut(&slot) {
            match existing.status_at(now) {
                RestoreStatus::InProgress => {
                    return Err(StorageError::restore_already_in_progress(&format!("{bucket}/{key}")));
                },
                RestoreStatus::Completed => {
                    // Re-requesting a restored copy only pushes its expiry out.
                    existing.expires_at = now + lifetime;
                    existing.days = restore_days;
                    let response = StorageResponse::Restore {
                        status: RestoreStatus::Completed,
                        completes_at: Some(existing.completes_at),
                    };
                    return Ok(Completed::new(30.0, response));
                },
                _ => (),
            }
        }

        let completes_at = now + delay;
        let request = RestoreRequest {
            bucket: bucket.into(),
            key: key.into(),
            tier,
            days: restore_days,
            requested_at: now,
            completes_at,
            expires_at: completes_at + lifetime,
            failed: false,
        };
        debug!(bucket, key, ?tier, completes_at, "restore initiated");
        self.restores.insert(slot, request);
        Ok(Completed::new(
            30.0,
            StorageResponse::Restore { status: RestoreStatus::InProgress, completes_at: Some(completes_at) },
        ))
    }

    pub(super) fn restore_status(&self, bucket: &str, key: &str) -> anyhow::Result<Completed<StorageResponse>> {
        self.bucket(bucket)?;
        let response = match self.restores.get(&(bucket.to_owned(), key.to_owned())) {
            Some(r) => StorageResponse::Restore { status: r.status_at(self.now), completes_at: Some(r.completes_at) },
            None => StorageResponse::Restore { status: RestoreStatus::NotRequested, completes_at: None },
        };
        Ok(Completed::new(6.0, response))
    }

    /// Whether an archived object currently has a readable restored copy.
    pub(super) fn is_restored(&self, bucket: &str, key: &str) -> bool {
        self.restores
            .get(&(bucket.to_owned(), key.to_owned()))
            .is_some_and(|r| r.status_at(self.now) == RestoreStatus::Completed)
    }

    /// The object behind a restore went away: an in-progress restore fails, anything else is
    /// dropped.
    pub(super) fn forget_restore(&mut self, bucket: &str, key: &str) {
        let slot = (bucket.to_owned(), key.to_owned());
        let now = self.now;
        match self.restores.get_mut(&slot) {
            Some(r) if r.status_at(now) == RestoreStatus::InProgress => {
                debug!(bucket, key, "object removed while restore in progress");
                r.failed = true;
            },
            Some(_) => {
                self.restores.remove(&slot);
            },
            None => (),
        }
    }

    pub(super) fn prune_restores(&mut self) {
        let now = self.now;
        self.restores.retain(|_, r| match r.status_at(now) {
            RestoreStatus::Expired => false,
            RestoreStatus::Failed => now - r.requested_at < FAILED_RESTORE_RETENTION,
            _ => true,
        });
    }

    pub(super) fn restores_with_status(&self, status: RestoreStatus) -> u64 {
        self.restores.values().filter(|r| r.status_at(self.now) == status).count() as u64
    }
}
