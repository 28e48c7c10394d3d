use std::collections::VecDeque;

use em_core::time::SimTime;
use serde::{
    Deserialize,
    Serialize,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) struct StoredMessage {
    pub timestamp: SimTime,
    pub size_bytes: u64,
}

/// An append-only log segment.  Retained messages occupy offsets
/// `log_start_offset..high_water_mark`, contiguously.
#[derive(Clone, Debug, Default)]
pub(super) struct Partition {
    messages: VecDeque<StoredMessage>,
    log_start_offset: u64,
    high_water_mark: u64,
    retained_bytes: u64,
}

impl Partition {
    pub fn append(&mut self, timestamp: SimTime, size_bytes: u64) -> u64 {
        let offset = self.high_water_mark;
        self.messages.push_back(StoredMessage { timestamp, size_bytes });
        self.high_water_mark += 1;
        self.retained_bytes = self.retained_bytes.saturating_add(size_bytes);
        offset
    }

    /// Drop messages at or before `cutoff`, then trim to `max_len`.  Returns how many were
    /// removed.
    pub fn expire(&mut self, cutoff: SimTime, max_len: usize) -> u64 {
        let mut removed = 0;
        while self.messages.front().is_some_and(|m| m.timestamp <= cutoff) || self.messages.len() > max_len {
            if let Some(m) = self.messages.pop_front() {
                self.retained_bytes = self.retained_bytes.saturating_sub(m.size_bytes);
                self.log_start_offset += 1;
                removed += 1;
            }
        }
        removed
    }

    pub fn message(&self, offset: u64) -> Option<&StoredMessage> {
        let index = offset.checked_sub(self.log_start_offset)?;
        self.messages.get(usize::try_from(index).ok()?)
    }

    pub const fn log_start_offset(&self) -> u64 {
        self.log_start_offset
    }

    pub const fn high_water_mark(&self) -> u64 {
        self.high_water_mark
    }

    pub fn retained(&self) -> u64 {
        self.messages.len() as u64
    }

    pub const fn retained_bytes(&self) -> u64 {
        self.retained_bytes
    }

    pub fn stats(&self, partition: usize) -> PartitionStats {
        PartitionStats {
            partition,
            log_start_offset: self.log_start_offset,
            high_water_mark: self.high_water_mark,
            retained: self.retained(),
        }
    }
}

/// Offsets of one partition.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionStats {
    /// Partition index.
    pub partition: usize,
    /// Oldest retained offset.
    pub log_start_offset: u64,
    /// Offset the next message will get.
    pub high_water_mark: u64,
    /// Messages currently retained.
    pub retained: u64,
}

/// One topic's state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicStats {
    /// Topic name.
    pub name: String,
    /// Per-partition offsets.
    pub partitions: Vec<PartitionStats>,
    /// Retained messages across partitions.
    pub retained_messages: u64,
    /// Retained bytes across partitions.
    pub retained_bytes: u64,
    /// Messages published so far.
    pub published: u64,
    /// Messages removed by retention so far.
    pub expired: u64,
}

/// One consumer group's progress.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStats {
    /// Group name.
    pub name: String,
    /// Topic the group reads.
    pub topic: String,

    /// Next offset to read, per partition.
    pub committed: Vec<u64>,
    /// Messages the group has yet to read.
    pub lag: u64,
    /// Messages consumed so far.
    pub consumed: u64,

    /// Messages that expired before this group read them.
    pub skipped: u64,
}
