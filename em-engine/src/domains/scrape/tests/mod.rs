use assertables::*;
use rstest::*;

use super::*;

#[fixture]
fn engine() -> ScrapeEngine {
    let config = ScrapeConfig::default().targets(vec![
        TargetConfig::new("healthy", "node", 1_000).failure_rate(0.0),
        TargetConfig::new("broken", "api", 10).failure_rate(1.0).interval_secs(30_u64),
    ]);
    let mut engine = ScrapeEngine::new(config, 21);
    engine.advance(0).unwrap();
    engine
}

#[rstest]
fn test_scrapes_follow_interval(mut engine: ScrapeEngine) {
    engine.advance(15 * SECOND - 1).unwrap();
    assert_eq!(engine.target("healthy").unwrap().scrapes, 0);
    assert_eq!(engine.target("healthy").unwrap().health, Health::Unknown);

    engine.advance(15 * SECOND).unwrap();
    let healthy = engine.target("healthy").unwrap();
    assert_eq!(healthy.scrapes, 1);
    assert_eq!(healthy.health, Health::Up);
    assert_eq!(healthy.samples_ingested, 1_000);
    assert_eq!(healthy.next_scrape_at, 30 * SECOND);

    engine.advance(60 * SECOND).unwrap();
    assert_eq!(engine.target("healthy").unwrap().scrapes, 4);
    assert_eq!(engine.target("broken").unwrap().scrapes, 2);
}

#[rstest]
fn test_failing_target_is_down(mut engine: ScrapeEngine) {
    engine.advance(30 * SECOND).unwrap();

    let broken = engine.target("broken").unwrap();
    assert_eq!(broken.health, Health::Down);
    assert_eq!(broken.failures, 1);
    assert_eq!(broken.samples_ingested, 0);
    assert_eq!(broken.last_error.as_deref(), Some("connection refused"));

    let snapshot = engine.metrics();
    assert_eq!(snapshot.entity_count("up"), 1);
    assert_eq!(snapshot.entity_count("series"), 1_000);
    assert_eq!(snapshot.operations.total_errors, 1);
}

#[test]
fn test_timeout_caps_duration() {
    let config = ScrapeConfig::default().targets(vec![TargetConfig::new("slow", "db", 10)
        .failure_rate(0.0)
        .base_latency_ms(5_000.0)
        .timeout_ms(1_000_u64)]);
    let mut engine = ScrapeEngine::new(config, 1);

    let done = engine.apply(&ScrapeRequest::ScrapeNow { target: "slow".into() }).unwrap();
    assert_eq!(done.latency_ms, 1_000.0);
    let ScrapeResponse::Scraped { health, error, .. } = done.value;
    assert_eq!(health, Health::Down);
    assert_eq!(error.as_deref(), Some("context deadline exceeded"));
}

#[rstest]
fn test_manual_scrape_keeps_schedule(mut engine: ScrapeEngine) {
    let done = engine.apply(&ScrapeRequest::ScrapeNow { target: "healthy".into() }).unwrap();
    assert_in_range!(done.latency_ms, 24.0..=36.0);
    assert_eq!(engine.target("healthy").unwrap().next_scrape_at, 15 * SECOND);

    let err = engine.apply(&ScrapeRequest::ScrapeNow { target: "nope".into() }).unwrap_err();
    assert!(matches!(err.downcast_ref::<ScrapeError>(), Some(ScrapeError::TargetNotFound(_))));
}

#[rstest]
fn test_ingestion_rate_window(mut engine: ScrapeEngine) {
    engine.advance(60 * SECOND).unwrap();
    let DomainMetrics::Scrape(domain) = engine.metrics().domain else {
        panic!("expected scrape metrics");
    };
    // 15s, 30s, 45s and 60s fall in (0, 60s]
    assert_eq!(domain.ingestion_rate, 4_000.0 / 60.0);

    engine.advance(10 * 60 * SECOND + 14 * SECOND).unwrap();
    let DomainMetrics::Scrape(domain) = engine.metrics().domain else {
        panic!("expected scrape metrics");
    };
    assert_eq!(domain.ingestion_rate, 4_000.0 / 60.0);
}

#[test]
fn test_long_pause_bounds_catch_up() {
    let config = ScrapeConfig::default().targets(vec![TargetConfig::new("t", "j", 1).interval_secs(1_u64)]);
    let mut engine = ScrapeEngine::new(config, 2);
    engine.advance(0).unwrap();
    engine.advance(DAY).unwrap();

    let target = engine.target("t").unwrap();
    assert_eq!(target.scrapes, MAX_OPS_PER_TICK as u64);
    assert_eq!(target.last_scrape_at, Some(DAY));
    assert_eq!(target.next_scrape_at, DAY + SECOND);
}
