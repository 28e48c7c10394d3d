use assertables::*;
use rstest::*;

use super::*;

#[fixture]
fn engine() -> DatabaseEngine {
    let config = DatabaseConfig::default()
        .tables(vec![TableConfig::new("small", 10), TableConfig::new("big", 1_000_000)])
        .queries_per_sec(0.0)
        .max_connections(2);
    let mut engine = DatabaseEngine::new(config, 13);
    engine.advance(0).unwrap();
    engine
}

fn latency(engine: &mut DatabaseEngine, request: DatabaseRequest) -> f64 {
    let done = engine.apply(&request).unwrap();
    // Let the connection go back to the pool before the next query.
    engine.advance(engine.now + 60 * SECOND).unwrap();
    done.latency_ms
}

#[rstest]
fn test_writes_change_row_counts(mut engine: DatabaseEngine) {
    engine.apply(&DatabaseRequest::Insert { table: "small".into(), rows: 5 }).unwrap();
    assert_eq!(engine.table("small").unwrap().rows, 15);

    let done = engine.apply(&DatabaseRequest::Delete { table: "small".into(), rows: 100 }).unwrap();
    assert_eq!(done.value, DatabaseResponse::Rows { table: "small".into(), affected: 15 });
    assert_eq!(engine.table("small").unwrap().rows, 0);
    assert_eq!(engine.table("small").unwrap().writes, 2);
}

#[rstest]
fn test_latency_grows_with_table_size(mut engine: DatabaseEngine) {
    let small = latency(&mut engine, DatabaseRequest::Select { table: "small".into(), limit: Some(1) });
    let big = latency(&mut engine, DatabaseRequest::Select { table: "big".into(), limit: Some(1) });
    assert_lt!(small, big);

    let scan = latency(&mut engine, DatabaseRequest::Select { table: "big".into(), limit: None });
    assert_gt!(scan, engine.config.slow_query_threshold_ms);

    let DomainView::Database(DatabaseView::SlowQueries(slow)) =
        engine.query(&DomainQuery::Database(DatabaseQuery::SlowQueries { limit: 10 })).unwrap()
    else {
        panic!("expected slow queries");
    };
    assert_eq!(slow.len(), 1);
    assert_eq!(slow[0].table, "big");
}

#[rstest]
fn test_connection_limit(mut engine: DatabaseEngine) {
    let scan = DatabaseRequest::Select { table: "big".into(), limit: None };
    let first = engine.apply(&scan).unwrap();
    let second = engine.apply(&scan).unwrap();
    assert_gt!(second.latency_ms, first.latency_ms);

    let err = engine.apply(&scan).unwrap_err();
    assert!(matches!(err.downcast_ref::<DatabaseError>(), Some(DatabaseError::ConnectionLimit(2))));
    assert_eq!(engine.metrics().utilization["connections"], 1.0);

    engine.advance(engine.now + 60 * SECOND).unwrap();
    assert_eq!(engine.active_connections(), 0);
    assert_ok!(engine.apply(&scan));

    let DomainMetrics::Database(domain) = engine.metrics().domain else {
        panic!("expected database metrics");
    };
    assert_eq!(domain.rejected_connections, 1);
    assert_eq!(domain.peak_connections, 2);
}

#[rstest]
fn test_unknown_table(mut engine: DatabaseEngine) {
    let err = engine.apply(&DatabaseRequest::Update { table: "nope".into(), rows: 1 }).unwrap_err();
    assert!(matches!(err.downcast_ref::<DatabaseError>(), Some(DatabaseError::TableNotFound(_))));
    assert_eq!(engine.log.count(OpKind::Update), 1);
}

#[rstest]
fn test_reconfigure_keeps_rows(mut engine: DatabaseEngine) {
    engine.apply(&DatabaseRequest::Insert { table: "small".into(), rows: 5 }).unwrap();
    let config = DatabaseConfig::default().tables(vec![TableConfig::new("small", 10), TableConfig::new("new", 3)]);
    engine.reconfigure(&ComponentConfig::RelationalDatabase(config)).unwrap();

    assert_eq!(engine.table("small").unwrap().rows, 15);
    assert_eq!(engine.table("new").unwrap().rows, 3);
    assert_none!(engine.table("big"));
}

#[test]
fn test_synthetic_queries() {
    let mut engine = DatabaseEngine::new(DatabaseConfig::default().error_rate(0.0), 6);
    engine.advance(0).unwrap();
    engine.advance(30 * SECOND).unwrap();

    let snapshot = engine.metrics();
    assert_eq!(snapshot.operations.total_operations, 600);
    let reads = snapshot.operations.counts_by_kind.get(&OpKind::Select).copied().unwrap_or(0);
    assert_in_range!(reads, 400..=560);
    assert_eq!(snapshot.entity_count("tables"), 2);
}
