use assertables::*;
use rstest::*;
use serde_json::json;
use tracing_test::traced_test;

use super::*;
use crate::domains::payment::PaymentConfig;

#[rstest]
#[case("minio", ComponentKind::ObjectStorage)]
#[case("RabbitMQ", ComponentKind::MessageBroker)]
#[case("relational_database", ComponentKind::RelationalDatabase)]
#[case(" zipkin ", ComponentKind::TracingBackend)]
#[case("prometheus", ComponentKind::MetricsScraper)]
#[case("mulesoft", ComponentKind::IntegrationPlatform)]
#[case("stripe", ComponentKind::PaymentGateway)]
#[case("rpa-bot", ComponentKind::RpaBot)]
fn test_kind_from_str(#[case] name: &str, #[case] expected: ComponentKind) {
    assert_eq!(name.parse::<ComponentKind>().unwrap(), expected);
}

#[test]
fn test_kind_from_str_unsupported() {
    let err = "mainframe".parse::<ComponentKind>().unwrap_err();
    assert!(matches!(err.downcast_ref::<RegistryError>(), Some(RegistryError::UnsupportedComponentKind(_))));
}

#[test]
fn test_kind_names_round_trip() {
    for kind in ComponentKind::ALL {
        assert_eq!(kind.as_str().parse::<ComponentKind>().unwrap(), kind);
        assert_eq!(serde_json::to_value(kind).unwrap(), json!(kind.as_str()));
    }
}

#[test]
#[traced_test]
fn test_malformed_field_keeps_default() {
    let config = ComponentConfig::from_value(
        ComponentKind::PaymentGateway,
        &json!({"currency": "eur", "feePercent": "lots", "componentType": "rpa-bot"}),
    );
    let ComponentConfig::PaymentGateway(payment) = config else {
        panic!("component type must not change");
    };
    assert_eq!(payment.currency, "eur");
    assert_eq!(payment.fee_percent, PaymentConfig::default().fee_percent);
    assert!(logs_contain("malformed config field"));
}

#[test]
#[traced_test]
fn test_out_of_range_value_normalized() {
    let config = ComponentConfig::from_value(ComponentKind::RelationalDatabase, &json!({"readRatio": 3.5}));
    let ComponentConfig::RelationalDatabase(db) = config else {
        panic!("expected database config");
    };
    assert_eq!(db.read_ratio, 0.8);
    assert!(logs_contain("config value out of range"));
}

#[test]
fn test_merge_on_top_of_current() {
    let current = ComponentConfig::from_value(ComponentKind::RelationalDatabase, &json!({"maxConnections": 12}));
    let merged = current.merged(&json!({"queriesPerSec": 5}));
    let ComponentConfig::RelationalDatabase(db) = merged else {
        panic!("expected database config");
    };
    assert_eq!(db.max_connections, 12);
    assert_eq!(db.queries_per_sec, 5.0);

    // null resets a field to its default
    let ComponentConfig::RelationalDatabase(db) = current.merged(&json!({"maxConnections": null})) else {
        panic!("expected database config");
    };
    assert_eq!(db.max_connections, 100);
}

#[test]
fn test_non_object_patch_is_ignored() {
    let current = ComponentConfig::default_for(ComponentKind::MetricsScraper);
    assert_eq!(current.merged(&json!([1, 2, 3])), current);
    assert_eq!(current.merged(&Value::Null), current);
}

#[test]
fn test_merge_patch() {
    let mut doc = json!({"a": 1, "b": {"c": 2, "d": 3}});
    merge_patch(&mut doc, &json!({"b": {"c": null, "e": 4}, "f": [1]}));
    assert_eq!(doc, json!({"a": 1, "b": {"d": 3, "e": 4}, "f": [1]}));
}

#[test]
fn test_tagged_config() {
    let config: ComponentConfig =
        serde_json::from_value(json!({"componentType": "rpa-bot", "maxConcurrentRuns": 4})).unwrap();
    assert_eq!(config.kind(), ComponentKind::RpaBot);
    assert_none!(config.seed());

    let doc = serde_json::to_value(&config).unwrap();
    assert_eq!(doc["componentType"], "rpa-bot");
    assert_eq!(doc["maxConcurrentRuns"], 4);
}

#[rstest]
#[case(1000, 1.0, 1000)]
#[case(2000, 0.5, 1000)]
#[case(1000, 3600.0, 3_600_000)]
#[case(1000, -2.0, 1000)]
#[case(0, 1.0, 1)]
fn test_clock_sim_step(#[case] period: u64, #[case] scale: f64, #[case] expected: i64) {
    let config = ClockConfig::default().tick_period_ms(period).time_scale(scale);
    assert_eq!(config.sim_step(), expected);
}
