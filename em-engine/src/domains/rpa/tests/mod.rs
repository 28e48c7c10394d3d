use assertables::*;
use rstest::*;

use super::*;

#[fixture]
fn engine() -> RpaEngine {
    let config = RpaConfig::default()
        .bots(vec![
            BotConfig::new("fast", 2, 1_000).step_failure_rate(0.0),
            BotConfig::new("slow", 3, 10_000).step_failure_rate(0.0),
        ])
        .runs_per_sec(0.0)
        .max_concurrent_runs(1_usize);
    let mut engine = RpaEngine::new(config, 8);
    engine.advance(0).unwrap();
    engine
}

fn start(engine: &mut RpaEngine, bot: &str) -> BotRun {
    let RpaResponse::Run(run) = engine.apply(&RpaRequest::StartRun { bot: bot.into() }).unwrap().value;
    run
}

#[rstest]
fn test_runs_wait_for_a_free_slot(mut engine: RpaEngine) {
    let fast = start(&mut engine, "fast");
    assert_eq!(fast.status, RunStatus::Running);
    assert_eq!(fast.started_at, Some(0));

    let slow = start(&mut engine, "slow");
    assert_eq!(slow.status, RunStatus::Queued);
    assert_eq!(engine.metrics().utilization["slots"], 1.0);

    engine.advance(2 * SECOND).unwrap();
    let fast = engine.run(&fast.run_id).unwrap();
    assert_eq!(fast.status, RunStatus::Completed);
    assert_eq!(fast.finished_at, Some(2 * SECOND));
    assert_eq!(fast.steps_completed, 2);

    let slow = engine.run(&slow.run_id).unwrap().clone();
    assert_eq!(slow.status, RunStatus::Running);
    assert_eq!(slow.started_at, Some(2 * SECOND));

    engine.advance(32 * SECOND - 1).unwrap();
    assert_eq!(engine.run(&slow.run_id).unwrap().status, RunStatus::Running);
    engine.advance(32 * SECOND).unwrap();
    assert_eq!(engine.run(&slow.run_id).unwrap().finished_at, Some(32 * SECOND));

    assert_eq!(engine.bot("fast").unwrap().avg_duration_ms, 2_000.0);
    assert_eq!(engine.log.count(OpKind::BotTrigger), 2);
    assert_eq!(engine.log.count(OpKind::BotRun), 2);
}

#[rstest]
fn test_late_advance_replays_completions_in_order(mut engine: RpaEngine) {
    let first = start(&mut engine, "fast");
    let second = start(&mut engine, "fast");
    let third = start(&mut engine, "fast");

    engine.advance(HOUR).unwrap();
    assert_eq!(engine.run(&first.run_id).unwrap().finished_at, Some(2 * SECOND));
    assert_eq!(engine.run(&second.run_id).unwrap().started_at, Some(2 * SECOND));
    assert_eq!(engine.run(&third.run_id).unwrap().finished_at, Some(6 * SECOND));
    assert_eq!(engine.running(), 0);
    assert_eq!(engine.queued(), 0);
}

#[test]
fn test_failing_step_aborts_run() {
    let config = RpaConfig::default()
        .bots(vec![BotConfig::new("flaky", 5, 1_000).step_failure_rate(1.0)])
        .runs_per_sec(0.0);
    let mut engine = RpaEngine::new(config, 3);
    let run = start(&mut engine, "flaky");
    engine.advance(10 * SECOND).unwrap();

    let run = engine.run(&run.run_id).unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.failed_step, Some(1));
    assert_eq!(run.steps_completed, 0);
    assert_eq!(run.finished_at, Some(SECOND));

    let stats = engine.bot("flaky").unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.success_rate, 0.0);
    assert_eq!(engine.metrics().operations.total_errors, 1);
}

#[rstest]
fn test_cancel_frees_the_slot(mut engine: RpaEngine) {
    let fast = start(&mut engine, "fast");
    let slow = start(&mut engine, "slow");
    engine.advance(1_500).unwrap();

    let done = engine.apply(&RpaRequest::CancelRun { run_id: fast.run_id.clone() }).unwrap();
    let RpaResponse::Run(cancelled) = done.value;
    assert_eq!(cancelled.status, RunStatus::Cancelled);
    assert_eq!(cancelled.steps_completed, 1);
    assert_eq!(engine.run(&slow.run_id).unwrap().started_at, Some(1_500));

    let err = engine.apply(&RpaRequest::CancelRun { run_id: fast.run_id }).unwrap_err();
    assert!(matches!(err.downcast_ref::<RpaError>(), Some(RpaError::RunFinished(_))));

    let err = engine.apply(&RpaRequest::CancelRun { run_id: "run-999999".into() }).unwrap_err();
    assert!(matches!(err.downcast_ref::<RpaError>(), Some(RpaError::RunNotFound(_))));

    let DomainMetrics::Rpa(domain) = engine.metrics().domain else {
        panic!("expected rpa metrics");
    };
    assert_eq!(domain.cancelled, 1);
    assert_eq!(domain.running, 1);
}

#[rstest]
fn test_unknown_bot(mut engine: RpaEngine) {
    let err = engine.apply(&RpaRequest::StartRun { bot: "nope".into() }).unwrap_err();
    assert!(matches!(err.downcast_ref::<RpaError>(), Some(RpaError::BotNotFound(_))));
    assert_eq!(engine.log.count(OpKind::BotTrigger), 1);
    assert_eq!(engine.metrics().operations.total_errors, 1);
}

#[test]
fn test_history_keeps_active_runs() {
    let config = RpaConfig::default()
        .bots(vec![BotConfig::new("fast", 1, 1_000).step_failure_rate(0.0)])
        .runs_per_sec(0.0)
        .max_concurrent_runs(1_usize)
        .max_runs(2_usize);
    let mut engine = RpaEngine::new(config, 4);
    let runs: Vec<_> = (0..3).map(|_| start(&mut engine, "fast")).collect();
    assert!(runs.iter().all(|r| engine.run(&r.run_id).is_some()));

    engine.advance(MINUTE).unwrap();
    assert_none!(engine.run(&runs[0].run_id));
    assert_some!(engine.run(&runs[1].run_id));
    assert_some!(engine.run(&runs[2].run_id));

    let DomainView::Rpa(RpaView::Runs(recent)) =
        engine.query(&DomainQuery::Rpa(RpaQuery::Runs { bot: Some("fast".into()), limit: 1 })).unwrap()
    else {
        panic!("expected runs");
    };
    assert_eq!(recent[0].run_id, runs[2].run_id);
}

#[test]
fn test_synthetic_triggers() {
    let mut engine = RpaEngine::new(RpaConfig::default().runs_per_sec(1.0), 12);
    engine.advance(0).unwrap();
    engine.advance(MINUTE).unwrap();

    assert_eq!(engine.log.count(OpKind::BotTrigger), 60);
    let triggered: u64 = engine.bots.values().map(|b| b.runs).sum();
    assert_eq!(triggered, 60);
    assert_le!(engine.running(), 2);
    assert_eq!(engine.metrics().entity_count("bots"), 2);
}
