use assertables::*;
use rstest::*;

use super::*;

#[fixture]
fn engine() -> MessagingEngine {
    let config = MessagingConfig::default()
        .topics(vec![TopicConfig::new("orders", 2, 0.0).retention_secs(60_u64)])
        .consumer_groups(vec![ConsumerGroupConfig::new("billing", "orders", 0.0)]);
    let mut engine = MessagingEngine::new(config, 3);
    engine.advance(0).unwrap();
    engine
}

fn publish(engine: &mut MessagingEngine, key: Option<&str>) -> (usize, u64) {
    let request = MessagingRequest::Publish { topic: "orders".into(), key: key.map(Into::into), size_bytes: 100 };
    match engine.apply(&request).unwrap().value {
        MessagingResponse::Published { partition, offset, .. } => (partition, offset),
        other => panic!("unexpected response: {other:?}"),
    }
}

fn consume(engine: &mut MessagingEngine, max_messages: usize) -> (u64, u64) {
    let request = MessagingRequest::Consume { group: "billing".into(), max_messages };
    match engine.apply(&request).unwrap().value {
        MessagingResponse::Consumed { messages, lag, .. } => (messages, lag),
        other => panic!("unexpected response: {other:?}"),
    }
}

#[rstest]
fn test_unkeyed_publish_round_robins(mut engine: MessagingEngine) {
    let placed: Vec<_> = (0..4).map(|_| publish(&mut engine, None)).collect();
    assert_eq!(placed, vec![(0, 0), (1, 0), (0, 1), (1, 1)]);
}

#[rstest]
fn test_keyed_publish_is_sticky(mut engine: MessagingEngine) {
    let (first, _) = publish(&mut engine, Some("customer-7"));
    for _ in 0..5 {
        assert_eq!(publish(&mut engine, Some("customer-7")).0, first);
    }
}

#[rstest]
fn test_unknown_topic_and_group(mut engine: MessagingEngine) {
    let err = engine
        .apply(&MessagingRequest::Publish { topic: "nope".into(), key: None, size_bytes: 1 })
        .unwrap_err();
    assert!(matches!(err.downcast_ref::<MessagingError>(), Some(MessagingError::TopicNotFound(_))));

    let err = engine.apply(&MessagingRequest::Consume { group: "nope".into(), max_messages: 1 }).unwrap_err();
    assert!(matches!(err.downcast_ref::<MessagingError>(), Some(MessagingError::GroupNotFound(_))));
    assert_eq!(engine.metrics().operations.total_errors, 2);
}

#[rstest]
fn test_consume_commits_and_reduces_lag(mut engine: MessagingEngine) {
    for _ in 0..5 {
        publish(&mut engine, None);
    }
    assert_eq!(engine.group_lag("billing"), Some(5));

    assert_eq!(consume(&mut engine, 3), (3, 2));
    assert_eq!(consume(&mut engine, 10), (2, 0));
    assert_eq!(consume(&mut engine, 10), (0, 0));

    let DomainView::Messaging(MessagingView::Groups(groups)) =
        engine.query(&DomainQuery::Messaging(MessagingQuery::ConsumerGroups)).unwrap()
    else {
        panic!("expected groups");
    };
    assert_eq!(groups[0].committed, vec![3, 2]);
    assert_eq!(groups[0].consumed, 5);
}

#[rstest]
fn test_retention_expires_and_skips(mut engine: MessagingEngine) {
    publish(&mut engine, None);
    publish(&mut engine, None);

    engine.advance(60 * SECOND - 1).unwrap();
    assert_eq!(engine.metrics().entity_count("messages"), 2);

    engine.advance(60 * SECOND).unwrap();
    assert_eq!(engine.metrics().entity_count("messages"), 0);

    // The high-water mark is unchanged, so the group is still behind until it fetches.
    assert_eq!(engine.group_lag("billing"), Some(2));
    assert_eq!(consume(&mut engine, 10), (0, 0));

    let DomainMetrics::Messaging(domain) = engine.metrics().domain else {
        panic!("expected messaging metrics");
    };
    assert_eq!(domain.expired, 2);
    assert_eq!(domain.groups["billing"].skipped, 2);
}

#[rstest]
fn test_partitions_grow_but_never_shrink(mut engine: MessagingEngine) {
    let grow = MessagingConfig::default().topics(vec![TopicConfig::new("orders", 4, 0.0)]);
    engine.reconfigure(&ComponentConfig::MessageBroker(grow)).unwrap();
    assert_eq!(engine.metrics().entity_count("partitions"), 4);

    let shrink = MessagingConfig::default().topics(vec![TopicConfig::new("orders", 1, 0.0)]);
    engine.reconfigure(&ComponentConfig::MessageBroker(shrink)).unwrap();
    assert_eq!(engine.metrics().entity_count("partitions"), 4);
}

#[test]
fn test_synthetic_producers_and_consumers() {
    let mut engine = MessagingEngine::new(MessagingConfig::default(), 8);
    engine.advance(0).unwrap();
    engine.advance(10 * SECOND).unwrap();

    let DomainMetrics::Messaging(domain) = engine.metrics().domain else {
        panic!("expected messaging metrics");
    };
    assert_eq!(domain.published, 250);
    assert_eq!(domain.groups["order-service"].consumed, 150);
    assert_eq!(domain.groups["order-service"].lag, 50);
    assert_le!(domain.groups["analytics"].consumed, 50);
    assert_eq!(domain.total_lag, domain.groups.values().map(|g| g.lag).sum::<u64>());
}
