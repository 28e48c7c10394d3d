//! Lifecycle sweep: age objects through the storage classes and expire them.
use em_core::time::days;
use tracing::{
    debug,
    instrument,
};

use super::*;

impl ObjectStorageEngine {
    /// Runs at the end of every `advance`.  Each object moves at most one class per sweep, and
    /// only forward.
    #[instrument(level = "trace", skip(self), fields(now = self.now))]
    pub(super) fn sweep_lifecycle(&mut self) {
        let now = self.now;
        let mut records = vec![];
        let mut removed = vec![];

        for (name, bucket) in &mut self.buckets {
            let Some(rule) = &bucket.config.lifecycle else {
                continue;
            };
            let transition_after = days(i64::from(rule.transition_after_days));
            let expire_after = rule.expire_after_days.map(|d| days(i64::from(d)));

            bucket.objects.retain(|key, obj| {
                if expire_after.is_some_and(|limit| now - obj.created_at > limit) {
                    records.push(LifecycleTransitionRecord {
                        bucket: name.clone(),
                        key: key.clone(),
                        from_class: obj.storage_class,
                        to_class: None,
                        action: LifecycleAction::Expiration,
                        timestamp: now,
                    });
                    removed.push((name.clone(), key.clone()));
                    return false;
                }

                if now - obj.last_transition_at > transition_after {
                    if let Some(next) = obj.storage_class.next() {
                        records.push(LifecycleTransitionRecord {
                            bucket: name.clone(),
                            key: key.clone(),
                            from_class: obj.storage_class,
                            to_class: Some(next),
                            action: LifecycleAction::Transition,
                            timestamp: now,
                        });
                        obj.transition_to(next, now);
                    }
                }
                true
            });
        }

        for (bucket, key) in removed {
            self.forget_restore(&bucket, &key);
        }
        for record in records {
            self.audit(record);
        }
        self.abort_stale_uploads();
        self.prune_restores();
    }

    fn audit(&mut self, record: LifecycleTransitionRecord) {
        debug!(
            bucket = %record.bucket,
            key = %record.key,
            from = %record.from_class,
            to = ?record.to_class,
            "lifecycle {:?}",
            record.action,
        );
        match record.action {
            LifecycleAction::Transition => self.transitions_total += 1,
            LifecycleAction::Expiration => self.expirations_total += 1,
        }
        if self.transitions.len() == TRANSITION_HISTORY_CAPACITY {
            self.transitions.pop_front();
        }
        self.transitions.push_back(record);
    }
}
