use assertables::*;
use rstest::*;

use super::*;
use crate::time::SECOND;

#[fixture]
fn log() -> OperationLog {
    let mut log = OperationLog::new(4);
    log.append(OperationRecord::success(100, OpKind::Put, 20.0).with_size(1024).with_target("photos"));
    log.append(OperationRecord::success(200, OpKind::Get, 10.0).with_target("photos"));
    log.append(OperationRecord::error(300, OpKind::Get, 5.0).with_target("logs"));
    log
}

#[rstest]
fn test_append_evicts_oldest_when_full(mut log: OperationLog) {
    log.append(OperationRecord::success(400, OpKind::List, 30.0));
    log.append(OperationRecord::success(500, OpKind::Delete, 15.0));

    assert_eq!(log.len(), 4);
    let records = log.snapshot();
    assert_eq!(records.first().map(|r| r.timestamp), Some(200));
    assert_eq!(records.last().map(|r| r.kind), Some(OpKind::Delete));

    // cumulative counters survive eviction
    assert_eq!(log.count(OpKind::Put), 1);
    assert_eq!(log.total_operations(), 5);
}

#[rstest]
fn test_snapshot_is_a_copy(mut log: OperationLog) {
    let before = log.snapshot();
    log.append(OperationRecord::success(400, OpKind::List, 30.0));
    assert_eq!(before.len(), 3);
    assert_eq!(log.len(), 4);
}

#[rstest]
fn test_summarize(log: OperationLog) {
    let summary = log.summarize(SECOND);
    assert_eq!(summary.total_operations, 3);
    assert_eq!(summary.total_errors, 1);
    assert_eq!(summary.counts_by_kind.get(&OpKind::Get), Some(&2));
    assert_eq!(summary.bytes_transferred, 1024);
    assert_eq!(summary.throughput, 3.0);
    assert_eq!(summary.latency.p50_ms, 10.0);
    assert_eq!(summary.latency.max_ms, 20.0);
    assert_gt!(summary.error_rate, 0.33);
    assert_lt!(summary.error_rate, 0.34);
}

#[rstest]
fn test_summarize_target(log: OperationLog) {
    let summary = log.summarize_target("photos", SECOND);
    assert_eq!(summary.total_operations, 2);
    assert_eq!(summary.total_errors, 0);
    assert_eq!(summary.error_rate, 0.0);
}

#[rstest]
fn test_summarize_target_throughput(log: OperationLog) {
    assert_eq!(log.summarize_target("photos", SECOND).throughput, 2.0);
    assert_eq!(log.summarize_target("logs", SECOND).throughput, 1.0);
    assert_eq!(log.summarize_target("nope", SECOND).throughput, 0.0);
}

#[test]
fn test_throughput_outruns_the_buffer() {
    let mut log = OperationLog::new(10);
    for i in 0..2000 {
        log.append(OperationRecord::success(i / 2 + 1, OpKind::Put, 1.0).with_target("photos"));
    }
    assert_eq!(log.len(), 10);

    let summary = log.summarize(1000);
    assert_eq!(summary.throughput, 2000.0);
    assert_eq!(summary.total_operations, 2000);
    assert_eq!(log.summarize_target("photos", 1000).throughput, 2000.0);
}

#[test]
fn test_byte_counters_saturate() {
    let mut log = OperationLog::new(4);
    for ts in 0..3 {
        log.append(OperationRecord::success(ts, OpKind::Put, 1.0).with_size(u64::MAX / 2 + 1));
    }
    assert_eq!(log.summarize(SECOND).bytes_transferred, u64::MAX);
}

#[test]
fn test_idle_targets_are_swept() {
    let mut log = OperationLog::new(4);
    for i in 0..100 {
        log.append(OperationRecord::success(i * SECOND, OpKind::Get, 1.0).with_target(&format!("bucket-{i}")));
    }
    assert_le!(log.target_rates.len(), TARGET_SWEEP_THRESHOLD);
    assert_eq!(log.summarize_target("bucket-99", 99 * SECOND).throughput, 1.0);
}

#[rstest]
fn test_recent(log: OperationLog) {
    let recent = log.recent(2);
    assert_eq!(recent.iter().map(|r| r.timestamp).collect::<Vec<_>>(), vec![200, 300]);
}

#[test]
fn test_op_kind_serializes_screaming() {
    assert_eq!(serde_json::to_string(&OpKind::MultipartComplete).ok().as_deref(), Some("\"MULTIPART_COMPLETE\""));
    assert_eq!(OpKind::Put.to_string(), "PUT");
}
