use assertables::*;
use rstest::*;

use super::*;

#[fixture]
fn engine() -> TracerEngine {
    let mut engine = TracerEngine::new(TracerConfig::default().traces_per_sec(0.0).max_traces(3), 1);
    engine.advance(0).unwrap();
    engine
}

fn span(trace: &str, id: &str, parent: Option<&str>, service: &str, start: SimTime, end: SimTime) -> Span {
    Span {
        trace_id: trace.into(),
        span_id: id.into(),
        parent_span_id: parent.map(Into::into),
        service: service.into(),
        operation: "op".into(),
        start_time: start,
        end_time: end,
        ..Default::default()
    }
}

fn record(engine: &mut TracerEngine, spans: Vec<Span>) -> TracingResponse {
    engine.apply(&TracingRequest::RecordSpans(spans)).unwrap().value
}

fn trace_detail(engine: &TracerEngine, trace_id: &str) -> anyhow::Result<TraceDetail> {
    match engine.query(&DomainQuery::Tracing(TracingQuery::Trace(trace_id.into())))? {
        DomainView::Tracing(TracingView::Trace(detail)) => Ok(detail),
        other => panic!("unexpected view: {other:?}"),
    }
}

#[rstest]
fn test_record_spans_groups_by_trace(mut engine: TracerEngine) {
    let response = record(
        &mut engine,
        vec![
            span("t1", "a", None, "web", 0, 50),
            span("t1", "b", Some("a"), "db", 10, 20),
            span("t2", "c", None, "web", 5, 6),
            span("", "d", None, "web", 5, 6),
        ],
    );

    assert_eq!(
        response,
        TracingResponse::Recorded { accepted: 3, dropped: 1, traces: vec!["t1".into(), "t2".into()] }
    );
    assert_eq!(engine.trace("t1").unwrap().spans.len(), 2);
    assert_eq!(engine.log.count(OpKind::RecordSpans), 1);
}

#[rstest]
fn test_trace_query_rebuilds_forest(mut engine: TracerEngine) {
    record(
        &mut engine,
        vec![
            span("t1", "A", None, "web", 0, 50),
            span("t1", "B", Some("A"), "db", 10, 20),
            span("t1", "C", Some("unknown"), "cache", 30, 35),
        ],
    );

    let detail = trace_detail(&engine, "t1").unwrap();
    assert_eq!(detail.forest.root_ids(), vec!["A", "C"]);
    assert_eq!(detail.forest.child_ids("A"), vec!["B"]);
    assert_eq!(detail.summary.root_service, "web");
    assert_eq!(detail.summary.span_count, 3);
}

#[rstest]
fn test_unknown_trace(engine: TracerEngine) {
    let err = trace_detail(&engine, "nope").unwrap_err();
    assert!(matches!(err.downcast_ref::<TracingError>(), Some(TracingError::TraceNotFound(_))));
}

#[rstest]
fn test_trace_seals_when_last_span_ends(mut engine: TracerEngine) {
    record(&mut engine, vec![span("t1", "a", None, "web", 0, 1500)]);
    assert!(!engine.trace("t1").unwrap().sealed);

    engine.advance(1499).unwrap();
    assert!(!engine.trace("t1").unwrap().sealed);
    engine.advance(1500).unwrap();
    assert!(engine.trace("t1").unwrap().sealed);

    // a late span reopens the trace
    record(&mut engine, vec![span("t1", "b", Some("a"), "db", 1400, 2000)]);
    assert!(!engine.trace("t1").unwrap().sealed);

    // resealing does not count the trace twice
    engine.advance(2000).unwrap();
    assert!(engine.trace("t1").unwrap().sealed);
    let DomainMetrics::Tracing(domain) = engine.metrics().domain else {
        panic!("expected tracing metrics");
    };
    assert_eq!(domain.traces_sealed, 1);
    assert_eq!(domain.traces_active, 0);
}

#[test]
fn test_ingest_utilization_tracks_span_rate() {
    let mut engine = TracerEngine::new(TracerConfig::default().traces_per_sec(0.0).ingest_capacity(10.0), 1);
    engine.advance(0).unwrap();
    engine.advance(500).unwrap();
    record(&mut engine, vec![span("t1", "a", None, "web", 0, 1), span("t1", "b", Some("a"), "db", 0, 1)]);
    engine.advance(900).unwrap();
    record(&mut engine, vec![span("t2", "a", None, "web", 0, 1)]);

    assert_eq!(engine.metrics().utilization.get("ingest").copied(), Some(0.3));

    // the first batch slides out of the window
    engine.advance(1500).unwrap();
    assert_eq!(engine.metrics().utilization.get("ingest").copied(), Some(0.1));
}

#[rstest]
fn test_retention_evicts_oldest(mut engine: TracerEngine) {
    for id in ["t1", "t2", "t3", "t4"] {
        record(&mut engine, vec![span(id, "a", None, "web", 0, 1)]);
    }

    assert_none!(engine.trace("t1"));
    assert_some!(engine.trace("t4"));

    let query = DomainQuery::Tracing(TracingQuery::RecentTraces { limit: 2, service: None, errors_only: false });
    let DomainView::Tracing(TracingView::Traces(recent)) = engine.query(&query).unwrap() else {
        panic!("expected traces");
    };
    let ids: Vec<_> = recent.iter().map(|t| t.trace_id.as_str()).collect();
    assert_eq!(ids, vec!["t4", "t3"]);

    let DomainMetrics::Tracing(domain) = engine.metrics().domain else {
        panic!("expected tracing metrics");
    };
    assert_eq!(domain.traces_retained, 3);
    assert_eq!(domain.traces_evicted, 1);
}

#[rstest]
fn test_service_stats(mut engine: TracerEngine) {
    let mut failed = span("t1", "b", Some("a"), "db", 10, 30);
    failed.status = SpanStatus::Error;
    record(&mut engine, vec![span("t1", "a", None, "web", 0, 50), failed, span("t1", "c", Some("a"), "db", 30, 40)]);

    let DomainView::Tracing(TracingView::Services(services)) =
        engine.query(&DomainQuery::Tracing(TracingQuery::ServiceStats)).unwrap()
    else {
        panic!("expected service stats");
    };
    let db = services.iter().find(|s| s.service == "db").unwrap();
    assert_eq!(db.span_count, 2);
    assert_eq!(db.error_count, 1);
    assert_eq!(db.error_rate, 0.5);
    assert_eq!(db.latency.max_ms, 20.0);
}

#[test]
fn test_synthetic_traces_follow_call_graph() {
    let mut engine = TracerEngine::new(TracerConfig::default().traces_per_sec(5.0), 3);
    engine.advance(0).unwrap();
    engine.advance(2 * SECOND).unwrap();

    assert_eq!(engine.traces.len(), 10);
    for trace in engine.traces.values() {
        let forest = SpanForest::build(&trace.spans);
        assert_eq!(forest.roots.len(), 1);
        assert_eq!(forest.nodes[forest.roots[0]].span.service, "frontend");
        assert_le!(forest.max_depth(), 7);

        // children never start before their parent
        for node in &forest.nodes {
            for &c in &node.children {
                assert_ge!(forest.nodes[c].span.start_time, node.span.start_time);
                assert_le!(forest.nodes[c].span.end_time, node.span.end_time);
            }
        }
    }
}

#[test]
fn test_max_depth_bounds_generated_traces() {
    let config = TracerConfig::default()
        .services(vec![ServiceConfig::new("loop", &["spin"], 1.0).calls(vec!["loop".into()])])
        .max_depth(4)
        .traces_per_sec(1.0);
    let mut engine = TracerEngine::new(config, 9);
    engine.advance(0).unwrap();
    engine.advance(SECOND).unwrap();

    let trace = engine.traces.values().next().unwrap();
    assert_eq!(trace.spans.len(), 4);
    assert_eq!(SpanForest::build(&trace.spans).max_depth(), 3);
}

#[rstest]
fn test_snapshot_counts(mut engine: TracerEngine) {
    record(&mut engine, vec![span("t1", "a", None, "web", 0, 1), span("t1", "b", Some("a"), "db", 0, 1)]);

    let snapshot = engine.metrics();
    assert_eq!(snapshot.kind, ComponentKind::TracingBackend);
    assert_eq!(snapshot.entity_count("traces"), 1);
    assert_eq!(snapshot.entity_count("spans"), 2);
    assert_eq!(snapshot.entity_count("services"), 2);
    assert_gt!(snapshot.utilization["ingest"], 0.0);
}
