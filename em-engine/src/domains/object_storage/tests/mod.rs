
use assertables::*;
use em_core::time::days;
use rstest::*;

use super::*;
use crate::metrics::DomainMetrics;

const BUCKET: &str = "photos";
const PLAIN_BUCKET: &str = "logs";

#[fixture]
fn engine() -> ObjectStorageEngine {
    let config = ObjectStorageConfig::default().ops_per_sec(0.0).buckets(vec![
        BucketConfig::named(BUCKET).lifecycle(LifecycleRule::default()),
        BucketConfig::named(PLAIN_BUCKET),
    ]);
    let mut engine = ObjectStorageEngine::new(config, 42);
    engine.advance(0).unwrap();
    engine
}

fn put(engine: &mut ObjectStorageEngine, bucket: &str, key: &str, size_bytes: u64) -> anyhow::Result<StorageObject> {
    let done = engine.apply(&StorageRequest::PutObject { bucket: bucket.into(), key: key.into(), size_bytes })?;
    match done.value {
        StorageResponse::Object(obj) => Ok(obj),
        other => panic!("unexpected response: {other:?}"),
    }
}

fn get(engine: &mut ObjectStorageEngine, bucket: &str, key: &str) -> anyhow::Result<Completed<StorageResponse>> {
    engine.apply(&StorageRequest::GetObject { bucket: bucket.into(), key: key.into() })
}

fn storage_error(err: &anyhow::Error) -> &StorageError {
    err.downcast_ref::<StorageError>().unwrap()
}

#[rstest]
fn test_put_creates_standard_object(mut engine: ObjectStorageEngine) {
    let obj = put(&mut engine, BUCKET, "cat.jpg", 4096).unwrap();

    assert_eq!(obj.storage_class, StorageClass::Standard);
    assert_eq!(obj.class_history, vec![StorageClass::Standard]);
    assert_none!(obj.version_id);

    let records = engine.log.snapshot();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].kind, OpKind::Put);
    assert_eq!(records[0].size_bytes, Some(4096));
    assert_eq!(records[0].target.as_deref(), Some(BUCKET));
}

#[rstest]
fn test_put_unknown_bucket(mut engine: ObjectStorageEngine) {
    let err = put(&mut engine, "nope", "cat.jpg", 4096).unwrap_err();

    assert!(matches!(storage_error(&err), StorageError::BucketNotFound(b) if b == "nope"));
    assert_eq!(engine.total_objects(), 0);

    let records = engine.log.snapshot();
    assert_eq!(records.len(), 1);
    assert!(records[0].is_error());
    assert_none!(records[0].size_bytes);
}

#[rstest]
#[case(0, 1024)]
#[case(1024, 1024 * 1024)]
#[case(1024 * 1024, 512 * 1024 * 1024)]
fn test_put_latency_grows_with_size(#[case] small: u64, #[case] large: u64) {
    assert_ge!(put_latency_ms(small), PUT_BASE_LATENCY_MS);
    assert_lt!(put_latency_ms(small), put_latency_ms(large));
}

#[rstest]
fn test_put_overwrites(mut engine: ObjectStorageEngine) {
    put(&mut engine, BUCKET, "cat.jpg", 10).unwrap();
    put(&mut engine, BUCKET, "cat.jpg", 20).unwrap();

    assert_eq!(engine.total_objects(), 1);
    assert_eq!(engine.object(BUCKET, "cat.jpg").unwrap().size_bytes, 20);
}

#[rstest]
fn test_get_object(mut engine: ObjectStorageEngine) {
    put(&mut engine, BUCKET, "cat.jpg", 200_000).unwrap();

    let done = get(&mut engine, BUCKET, "cat.jpg").unwrap();
    assert_eq!(done.latency_ms, get_latency_ms(StorageClass::Standard, 200_000));

    let err = get(&mut engine, BUCKET, "dog.jpg").unwrap_err();
    assert!(matches!(storage_error(&err), StorageError::NoSuchKey(_)));
    assert_eq!(engine.log.count(OpKind::Get), 2);
}

#[rstest]
fn test_delete_object(mut engine: ObjectStorageEngine) {
    put(&mut engine, BUCKET, "cat.jpg", 10).unwrap();

    let req = StorageRequest::DeleteObject { bucket: BUCKET.into(), key: "cat.jpg".into() };
    let done = engine.apply(&req).unwrap();
    assert_eq!(done.value, StorageResponse::Deleted { bucket: BUCKET.into(), key: "cat.jpg".into(), existed: true });
    assert_eq!(engine.total_objects(), 0);

    let done = engine.apply(&req).unwrap();
    assert!(matches!(done.value, StorageResponse::Deleted { existed: false, .. }));
}

#[rstest]
fn test_list_objects_prefix_and_truncation(mut engine: ObjectStorageEngine) {
    for key in ["a/1", "a/2", "a/3", "b/1"] {
        put(&mut engine, BUCKET, key, 1).unwrap();
    }

    let req = StorageRequest::ListObjects { bucket: BUCKET.into(), prefix: Some("a/".into()), max_keys: Some(2) };
    let StorageResponse::Listing { objects, truncated } = engine.apply(&req).unwrap().value else {
        panic!("expected a listing");
    };
    let keys: Vec<_> = objects.iter().map(|o| o.key.as_str()).collect();
    assert_eq!(keys, vec!["a/1", "a/2"]);
    assert!(truncated);

    let req = StorageRequest::ListObjects { bucket: BUCKET.into(), prefix: Some("b/".into()), max_keys: None };
    let StorageResponse::Listing { objects, truncated } = engine.apply(&req).unwrap().value else {
        panic!("expected a listing");
    };
    assert_eq!(objects.len(), 1);
    assert!(!truncated);
}

#[rstest]
fn test_versioned_bucket_mints_version_ids(mut engine: ObjectStorageEngine) {
    let mut config = engine.config().clone();
    config.buckets[0].versioning = true;
    engine.reconfigure(&ComponentConfig::ObjectStorage(config)).unwrap();

    let first = put(&mut engine, BUCKET, "cat.jpg", 10).unwrap();
    let second = put(&mut engine, BUCKET, "cat.jpg", 10).unwrap();
    assert_some!(&first.version_id);
    assert_some!(&second.version_id);
    assert_ne!(first.version_id, second.version_id);
}

#[rstest]
fn test_reconfigure_keeps_retained_buckets(mut engine: ObjectStorageEngine) {
    put(&mut engine, BUCKET, "cat.jpg", 10).unwrap();
    put(&mut engine, PLAIN_BUCKET, "app.log", 10).unwrap();

    let config = engine.config().clone().buckets(vec![BucketConfig::named(BUCKET), BucketConfig::named("new")]);
    engine.reconfigure(&ComponentConfig::ObjectStorage(config)).unwrap();

    assert_some!(engine.object(BUCKET, "cat.jpg"));
    assert_none!(engine.object(PLAIN_BUCKET, "app.log"));
    assert_eq!(engine.total_objects(), 1);
    put(&mut engine, "new", "x", 1).unwrap();
}

#[rstest]
fn test_reconfigure_wrong_family(mut engine: ObjectStorageEngine) {
    let err = engine.reconfigure(&ComponentConfig::default_for(ComponentKind::PaymentGateway)).unwrap_err();
    assert!(matches!(err.downcast_ref::<EngineError>(), Some(EngineError::WrongDomain(_))));
}

#[rstest]
fn test_bucket_metrics(mut engine: ObjectStorageEngine) {
    put(&mut engine, BUCKET, "a", 100).unwrap();
    put(&mut engine, BUCKET, "b", 300).unwrap();
    put(&mut engine, PLAIN_BUCKET, "c", 7).unwrap();

    let DomainView::Storage(StorageView::Bucket(metrics)) =
        engine.query(&DomainQuery::Storage(StorageQuery::BucketMetrics(BUCKET.into()))).unwrap()
    else {
        panic!("expected bucket metrics");
    };
    assert_eq!(metrics.object_count, 2);
    assert_eq!(metrics.total_bytes, 400);
    assert_eq!(metrics.objects_by_class.get(&StorageClass::Standard), Some(&2));
    assert_eq!(metrics.operations.total_operations, 2);

    let err = engine.query(&DomainQuery::Storage(StorageQuery::BucketMetrics("nope".into()))).unwrap_err();
    assert!(matches!(storage_error(&err), StorageError::BucketNotFound(_)));
}

#[rstest]
fn test_snapshot(mut engine: ObjectStorageEngine) {
    put(&mut engine, BUCKET, "a", 100).unwrap();
    let _ = get(&mut engine, BUCKET, "missing");

    let snapshot = engine.metrics();
    assert_eq!(snapshot.kind, ComponentKind::ObjectStorage);
    assert_eq!(snapshot.entity_count("buckets"), 2);
    assert_eq!(snapshot.entity_count("objects"), 1);
    assert_eq!(snapshot.operations.total_operations, 2);
    assert_eq!(snapshot.operations.error_rate, 0.5);
    assert_in_range!(snapshot.utilization["requests"], 0.0..=1.0);

    let DomainMetrics::Storage(domain) = snapshot.domain else {
        panic!("expected storage metrics");
    };
    assert_eq!(domain.buckets.len(), 2);
}

#[rstest]
fn test_query_other_family(engine: ObjectStorageEngine) {
    let query = DomainQuery::Payment(crate::domains::payment::PaymentQuery::Transactions { limit: None });
    let err = engine.query(&query).unwrap_err();
    assert!(matches!(err.downcast_ref::<EngineError>(), Some(EngineError::UnsupportedQuery(_))));
}

#[test]
fn test_synthetic_traffic_is_deterministic() {
    let config = ObjectStorageConfig::default().ops_per_sec(50.0).error_rate(0.1);
    let run = || {
        let mut engine = ObjectStorageEngine::new(config.clone(), 7);
        for i in 0..=10 {
            engine.advance(i * SECOND).unwrap();
        }
        engine.log.snapshot()
    };

    let first = run();
    assert_eq!(first.len(), 500);
    assert!(first.iter().any(|r| r.is_error()));
    assert_eq!(first, run());
}

#[rstest]
#[case(2000.0)]
#[case(5000.0)]
fn test_observed_throughput_matches_configured_rate(#[case] rate: f64) {
    let config = ObjectStorageConfig::default().ops_per_sec(rate).buckets(vec![BucketConfig::named(BUCKET)]);
    let mut engine = ObjectStorageEngine::new(config, 7);
    engine.advance(0).unwrap();
    for i in 1..=5 {
        engine.advance(i * em_core::time::SECOND).unwrap();
    }

    let snapshot = engine.metrics();
    assert_eq!(snapshot.operations.throughput, rate);
    assert_eq!(snapshot.operations.total_operations, 5 * rate as u64);

    let DomainMetrics::Storage(domain) = snapshot.domain else {
        panic!("expected storage metrics");
    };
    let bucket = &domain.buckets[BUCKET];
    assert_eq!(bucket.operations.throughput, rate);
    assert_eq!(bucket.utilization, (rate / DEFAULT_BUCKET_OPS_CAPACITY).min(1.0));
}
