use assertables::*;
use mockall::predicate::*;
use rstest::*;
use serde_json::json;
use tracing_test::traced_test;

use super::*;
use crate::config::ComponentKind;
use crate::domains::database::DatabaseRequest;
use crate::engine::OperationRequest;
use crate::testutils::*;

#[fixture]
fn registry() -> Arc<NodeRegistry> {
    let registry = Arc::new(NodeRegistry::new());
    quiet_database(&registry, "db");
    registry
}

fn clock(registry: &Arc<NodeRegistry>) -> SimulationClock {
    SimulationClock::new(Arc::clone(registry), ClockConfig::default())
}

#[rstest]
fn test_start_stop_idempotent(registry: Arc<NodeRegistry>) {
    let clock = clock(&registry);
    assert_none!(clock.tick());

    assert!(clock.start());
    assert!(!clock.start());
    assert_eq!(clock.tick().unwrap().now, SECOND);

    assert!(clock.stop());
    assert!(!clock.stop());
    assert_none!(clock.tick());
    assert_none!(clock.advance_by(DAY));
    assert_eq!(clock.now(), SECOND);
}

#[rstest]
fn test_stop_keeps_state(registry: Arc<NodeRegistry>) {
    let clock = clock(&registry);
    clock.start();
    clock.tick();
    registry
        .execute("db", &OperationRequest::Database(DatabaseRequest::Insert { table: "users".into(), rows: 3 }))
        .unwrap();
    clock.stop();

    let snapshot = registry.get("db").unwrap().metrics_snapshot();
    assert_eq!(snapshot.entity_count("rows"), 13);
    assert_eq!(snapshot.taken_at, SECOND);

    clock.start();
    let report = clock.tick().unwrap();
    assert_eq!(report.tick, 2);
    assert_eq!(report.now, 2 * SECOND);
    assert_eq!(registry.get("db").unwrap().metrics_snapshot().entity_count("rows"), 13);
}

#[rstest]
#[traced_test]
fn test_panicking_node_is_isolated(registry: Arc<NodeRegistry>) {
    let mut engine = mock_engine(ComponentKind::PaymentGateway);
    engine.expect_advance().with(eq(0)).returning(|_| Ok(()));
    engine.expect_advance().with(gt(0)).returning(|_| panic!("ledger corrupted"));
    registry.register_engine("a-pay", default_config(ComponentKind::PaymentGateway), Box::new(engine));

    let clock = clock(&registry);
    clock.start();
    let report = clock.tick().unwrap();
    assert_eq!(report.advanced, 1);
    assert_eq!(report.faulted, 1);
    assert!(logs_contain("engine fault: panic: ledger corrupted"));

    let report = clock.tick().unwrap();
    assert_eq!(report.faulted, 1);
    assert!(clock.is_running());

    let faulty = registry.get("a-pay").unwrap().metrics_snapshot();
    assert_eq!(faulty.engine_faults, 2);
    assert!(faulty.last_fault.unwrap().starts_with("panic: "));
    assert_eq!(registry.get("db").unwrap().metrics_snapshot().taken_at, 2 * SECOND);
}

#[test]
fn test_unregister_mid_tick() {
    let registry = Arc::new(NodeRegistry::new());

    let mut first = mock_engine(ComponentKind::RpaBot);
    let inner = Arc::clone(&registry);
    first.expect_advance().with(eq(0)).returning(|_| Ok(()));
    first.expect_advance().with(gt(0)).returning(move |_| {
        inner.unregister("b").unwrap();
        Ok(())
    });
    registry.register_engine("a", default_config(ComponentKind::RpaBot), Box::new(first));

    // Only the registration-time advance; the tick must skip it.
    let mut second = mock_engine(ComponentKind::RpaBot);
    second.expect_advance().times(1).returning(|_| Ok(()));
    registry.register_engine("b", default_config(ComponentKind::RpaBot), Box::new(second));

    let clock = clock(&registry);
    clock.start();
    let report = clock.tick().unwrap();
    assert_eq!(report, TickReport { tick: 1, now: SECOND, advanced: 1, skipped: 1, faulted: 0 });
    assert_none!(registry.get("b"));
    assert_eq!(registry.node_ids(), vec!["a".to_string()]);
}

#[rstest]
fn test_time_scale(registry: Arc<NodeRegistry>) {
    let config = ClockConfig::default().tick_period_ms(500_u64).time_scale(120.0);
    let clock = SimulationClock::new(Arc::clone(&registry), config);
    clock.start();
    clock.tick();
    assert_eq!(clock.now(), MINUTE);
    assert_eq!(registry.now(), MINUTE);

    let start = clock.sim_datetime().unwrap();
    clock.advance_by(DAY);
    assert_eq!(clock.sim_datetime().unwrap() - start, chrono::Duration::days(1));
}

#[rstest]
fn test_late_node_joins_at_clock_time(registry: Arc<NodeRegistry>) {
    let clock = clock(&registry);
    clock.start();
    clock.advance_by(HOUR);

    let handle = registry.register("late", "stripe", &json!({"seed": 3})).unwrap();
    assert_eq!(handle.metrics_snapshot().taken_at, HOUR);
    assert_eq!(clock.tick().unwrap().advanced, 2);
}

#[tokio::test(start_paused = true)]
async fn test_run_until_shutdown() {
    let registry = Arc::new(NodeRegistry::new());
    quiet_database(&registry, "db");
    let clock = Arc::new(clock(&registry));
    let (tx, rx) = watch::channel(false);

    let runner = {
        let clock = Arc::clone(&clock);
        tokio::spawn(async move { clock.run(rx).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(3_500)).await;
    tx.send(true).unwrap();
    runner.await.unwrap();

    assert!(!clock.is_running());
    assert_ge!(clock.ticks(), 3);
    assert_eq!(clock.now(), SECOND * i64::try_from(clock.ticks()).unwrap());
}
