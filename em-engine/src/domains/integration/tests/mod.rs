use assertables::*;

use super::*;

fn engine_with(flows: Vec<FlowConfig>) -> IntegrationEngine {
    let config = IntegrationConfig::default().flows(flows).executions_per_sec(0.0);
    let mut engine = IntegrationEngine::new(config, 17);
    engine.advance(0).unwrap();
    engine
}

fn linear_flow(processors: Vec<ProcessorConfig>) -> FlowConfig {
    FlowConfig::default().name("f").source(SourceKind::Scheduler).target_latency_ms(0.0).processors(processors)
}

fn run(engine: &mut IntegrationEngine, flow: &str) -> (FlowStatus, Vec<String>, f64) {
    let done = engine.apply(&IntegrationRequest::RunFlow { flow: flow.into() }).unwrap();
    let IntegrationResponse::FlowCompleted { status, path, .. } = done.value;
    (status, path, done.latency_ms)
}

#[test]
fn test_linear_flow_adds_latencies() {
    let mut engine = engine_with(vec![linear_flow(vec![
        ProcessorConfig::new("a", ProcessorKind::Transform, 3.0),
        ProcessorConfig::new("b", ProcessorKind::SetPayload, 4.5),
    ])
    .source(SourceKind::Http)
    .target_latency_ms(10.0)]);

    let (status, path, latency) = run(&mut engine, "f");
    assert_eq!(status, FlowStatus::Succeeded);
    assert_eq!(path, vec!["a", "b"]);
    assert_eq!(latency, 2.0 + 3.0 + 4.5 + 10.0);
}

#[test]
fn test_unknown_flow() {
    let mut engine = engine_with(vec![]);
    let err = engine.apply(&IntegrationRequest::RunFlow { flow: "nope".into() }).unwrap_err();
    assert!(matches!(err.downcast_ref::<IntegrationError>(), Some(IntegrationError::FlowNotFound(_))));
    assert_eq!(engine.log.count(OpKind::FlowRun), 1);
}

#[test]
fn test_filter_stops_flow() {
    let mut engine = engine_with(vec![linear_flow(vec![
        ProcessorConfig::new("drop-all", ProcessorKind::Filter, 1.0).failure_rate(1.0),
        ProcessorConfig::new("never", ProcessorKind::Logger, 1.0),
    ])]);

    let (status, path, _) = run(&mut engine, "f");
    assert_eq!(status, FlowStatus::Filtered);
    assert_eq!(path, vec!["drop-all"]);

    let stats = engine.flow_stats("f").unwrap();
    assert_eq!(stats.filtered, 1);
    assert_none!(stats.processors.get("never"));
}

#[test]
fn test_validation_failure_is_logged_as_error() {
    let mut engine = engine_with(vec![linear_flow(vec![
        ProcessorConfig::new("check", ProcessorKind::Validate, 2.0).failure_rate(1.0)
    ])]);

    let (status, _, latency) = run(&mut engine, "f");
    assert_eq!(status, FlowStatus::Failed);
    assert_eq!(latency, 2.0);

    let stats = engine.flow_stats("f").unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.processors["check"].failures, 1);
    assert_some!(stats.last_error.clone());

    let snapshot = engine.metrics();
    assert_eq!(snapshot.operations.total_errors, 1);
    assert_eq!(snapshot.operations.latency.max_ms, 2.0);
}

#[test]
fn test_try_contains_failures() {
    let mut engine = engine_with(vec![linear_flow(vec![
        ProcessorConfig::new("guard", ProcessorKind::Try, 0.0)
            .processors(vec![ProcessorConfig::new("flaky", ProcessorKind::Transform, 5.0).failure_rate(1.0)]),
        ProcessorConfig::new("after", ProcessorKind::Logger, 1.0),
    ])]);

    let (status, path, latency) = run(&mut engine, "f");
    assert_eq!(status, FlowStatus::Succeeded);
    assert_eq!(path, vec!["guard", "flaky", "after"]);
    assert_eq!(latency, 6.0);

    let stats = engine.flow_stats("f").unwrap();
    assert_eq!(stats.processors["guard"].caught, 1);
    assert_eq!(stats.processors["flaky"].failures, 1);
}

#[test]
fn test_async_is_off_the_critical_path() {
    let mut engine = engine_with(vec![linear_flow(vec![
        ProcessorConfig::new("fire", ProcessorKind::Async, 0.5).processors(vec![
            ProcessorConfig::new("slow", ProcessorKind::Enrich, 500.0).failure_rate(1.0)
        ]),
    ])]);

    let (status, path, latency) = run(&mut engine, "f");
    assert_eq!(status, FlowStatus::Succeeded);
    assert_eq!(path, vec!["fire", "slow"]);
    assert_eq!(latency, 0.5);
}

#[test]
fn test_choice_takes_exactly_one_route() {
    let mut engine = engine_with(vec![linear_flow(vec![ProcessorConfig::new("pick", ProcessorKind::Choice, 0.0)
        .routes(vec![
            ChoiceRoute::new("never", 0.0, vec![ProcessorConfig::new("left", ProcessorKind::Logger, 1.0)]),
            ChoiceRoute::new("always", 1.0, vec![ProcessorConfig::new("right", ProcessorKind::Logger, 1.0)]),
        ])])]);

    for _ in 0..20 {
        let (_, path, _) = run(&mut engine, "f");
        assert_eq!(path, vec!["pick", "right"]);
    }
}

#[test]
fn test_nesting_limit() {
    let mut nested = ProcessorConfig::new("leaf", ProcessorKind::Logger, 0.0);
    for i in 0..=MAX_NESTING {
        nested = ProcessorConfig::new(&format!("async-{i}"), ProcessorKind::Async, 0.0).processors(vec![nested]);
    }
    let mut engine = engine_with(vec![linear_flow(vec![nested])]);

    // The overflow happens inside an async block, so the flow itself still succeeds.
    let (status, path, _) = run(&mut engine, "f");
    assert_eq!(status, FlowStatus::Succeeded);
    assert_not_contains!(path, &"leaf".to_string());
}

#[test]
fn test_reconfigure_keeps_counters_for_surviving_flows() {
    let mut engine = engine_with(vec![linear_flow(vec![]), linear_flow(vec![]).name("g")]);
    run(&mut engine, "f");
    run(&mut engine, "g");

    let config = ComponentConfig::IntegrationPlatform(IntegrationConfig::default().flows(vec![linear_flow(vec![])]));
    engine.reconfigure(&config).unwrap();

    assert_eq!(engine.flow_stats("f").unwrap().executions, 1);
    assert_none!(engine.flow_stats("g"));
}

#[test]
fn test_synthetic_executions_use_default_flow() {
    let mut engine = IntegrationEngine::new(IntegrationConfig::default().executions_per_sec(10.0), 4);
    engine.advance(0).unwrap();
    engine.advance(10 * SECOND).unwrap();

    let snapshot = engine.metrics();
    let DomainMetrics::Integration(domain) = &snapshot.domain else {
        panic!("expected integration metrics");
    };
    assert_eq!(domain.executions, 100);
    assert_eq!(domain.succeeded + domain.failed + domain.filtered, 100);
    assert_eq!(snapshot.entity_count("flows"), 1);
    assert_eq!(snapshot.entity_count("processors"), 9);

    let stats = &domain.flows["orders-api"];
    assert_eq!(stats.processors["validate-order"].invocations, 100);
    let routed = stats.processors.get("enrich-customer").map_or(0, |p| p.invocations)
        + stats.processors.get("log-standard").map_or(0, |p| p.invocations);
    assert_eq!(routed + stats.failed, 100);
}
