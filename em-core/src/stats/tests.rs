use assertables::*;
use rstest::*;

use super::*;
use crate::time::MILLISECOND;

#[rstest]
#[case::empty(vec![], 0.0)]
#[case::all_inside(vec![9_100, 9_500, 10_000], 3.0)]
#[case::left_edge_excluded(vec![9_000, 9_001, 10_000], 2.0)]
#[case::future_excluded(vec![9_500, 10_001], 1.0)]
fn test_throughput_counts_half_open_window(#[case] timestamps: Vec<SimTime>, #[case] expected: f64) {
    assert_eq!(throughput(timestamps, 10_000, SECOND), expected);
}

#[test]
fn test_throughput_scales_by_window_width() {
    let timestamps: Vec<SimTime> = (1..=10).map(|i| i * 200 * MILLISECOND).collect();
    // (0, 2000] holds all ten records; over a two second window that's 5 ops/s
    assert_eq!(throughput(timestamps, 2 * SECOND, 2 * SECOND), 5.0);
}

#[rstest]
#[case(100)]
#[case(1000)]
fn test_percentile_uniform_sample(#[case] n: usize) {
    #[allow(clippy::cast_precision_loss)]
    let sorted: Vec<f64> = (1..=n).map(|i| i as f64).collect();

    #[allow(clippy::cast_precision_loss)]
    let expected_p50 = (n / 2 + 1) as f64;
    assert_eq!(percentile(&sorted, 50.0), expected_p50);

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let expected_p99 = sorted[((0.99 * n as f64).floor() as usize).min(n - 1)];
    assert_eq!(percentile(&sorted, 99.0), expected_p99);
    assert_ge!(percentile(&sorted, 99.0), sorted[n - 2]);
    assert_eq!(percentile(&sorted, 100.0), sorted[n - 1]);
}

#[test]
fn test_percentile_empty_is_zero() {
    assert_eq!(percentile(&[], 99.0), 0.0);
    assert_eq!(mean(&[]), 0.0);
}

#[rstest]
#[case(1750.0, 3500.0, 0.5)]
#[case(7000.0, 3500.0, 1.0)]
#[case(10.0, 0.0, 0.0)]
fn test_utilization(#[case] observed: f64, #[case] capacity: f64, #[case] expected: f64) {
    assert_eq!(utilization(observed, capacity), expected);
}

#[test]
fn test_sliding_window_counts_half_open_window() {
    let mut counter = SlidingWindowCounter::new(SECOND);
    counter.record(100);
    counter.record(600);
    assert_eq!(counter.count(1000), 2);
    assert_eq!(counter.count(1100), 1);

    counter.record(1200);
    counter.record(1900);
    assert_eq!(counter.count(2000), 2);
    assert_eq!(counter.rate(3000), 0.0);
    assert_eq!(counter.latest(), Some(1900));
}

#[test]
fn test_sliding_window_weighted_events() {
    let mut counter = SlidingWindowCounter::new(2 * SECOND);
    counter.record_n(500, 40);
    counter.record_n(500, 10);
    counter.record_n(1500, 0);
    counter.record_n(2200, 30);
    assert_eq!(counter.count(2200), 80);
    // the 500ms batch falls out of (600, 2600]
    assert_eq!(counter.rate(2600), 15.0);
}

#[test]
fn test_sliding_window_stays_bounded_at_high_rates() {
    let mut counter = SlidingWindowCounter::new(SECOND);
    for ts in 0..10_000 {
        counter.record_n(ts, 50);
    }
    assert_le!(counter.events.len(), 1000);
    assert_eq!(counter.count(9_999), 50_000);
}
