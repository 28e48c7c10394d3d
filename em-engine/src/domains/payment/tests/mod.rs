use assertables::*;
use rstest::*;

use super::*;

#[fixture]
fn engine() -> PaymentEngine {
    let config = PaymentConfig::default().payments_per_sec(0.0).failure_rate(0.0).max_transactions(3);
    let mut engine = PaymentEngine::new(config, 5);
    engine.advance(0).unwrap();
    engine
}

fn charge(engine: &mut PaymentEngine, amount: u64) -> Transaction {
    let request = PaymentRequest::CreatePayment { amount, currency: None, description: None };
    let PaymentResponse::Transaction(txn) = engine.apply(&request).unwrap().value;
    txn
}

/// Charge and let it run through authorization and processing.
fn succeeded(engine: &mut PaymentEngine, amount: u64) -> Transaction {
    let txn = charge(engine, amount);
    engine.advance(engine.now + 2_500).unwrap();
    engine.transaction(&txn.id).unwrap().clone()
}

fn payment_error(err: &anyhow::Error) -> &PaymentError {
    err.downcast_ref::<PaymentError>().unwrap()
}

#[rstest]
fn test_create_payment(mut engine: PaymentEngine) {
    let txn = charge(&mut engine, 2_000);
    assert_starts_with!(txn.id, "pi_");
    assert_eq!(txn.status, TransactionStatus::Pending);
    assert_eq!(txn.currency, "usd");
    assert_eq!(txn.fee, 0);
    assert_eq!(engine.log.count(OpKind::Charge), 1);
}

#[rstest]
fn test_zero_amount_rejected(mut engine: PaymentEngine) {
    let request = PaymentRequest::CreatePayment { amount: 0, currency: None, description: None };
    let err = engine.apply(&request).unwrap_err();
    assert!(matches!(payment_error(&err), PaymentError::InvalidAmount(0)));
    assert_eq!(engine.metrics().operations.total_errors, 1);
}

#[rstest]
fn test_auto_advance_moves_forward_only(mut engine: PaymentEngine) {
    let txn = charge(&mut engine, 10_000);

    engine.advance(499).unwrap();
    assert_eq!(engine.transaction(&txn.id).unwrap().status, TransactionStatus::Pending);
    engine.advance(500).unwrap();
    assert_eq!(engine.transaction(&txn.id).unwrap().status, TransactionStatus::Processing);
    engine.advance(2_500).unwrap();

    let txn = engine.transaction(&txn.id).unwrap();
    assert_eq!(txn.status, TransactionStatus::Succeeded);
    assert_eq!(txn.fee, 320);
    assert_eq!(txn.settles_at, Some(2_500 + 2 * DAY));
    let statuses: Vec<_> = txn.history.iter().map(|c| (c.status, c.at)).collect();
    assert_eq!(
        statuses,
        vec![
            (TransactionStatus::Pending, 0),
            (TransactionStatus::Processing, 500),
            (TransactionStatus::Succeeded, 2_500),
        ]
    );
}

#[rstest]
fn test_large_jump_stamps_due_times(mut engine: PaymentEngine) {
    let txn = charge(&mut engine, 100);
    engine.advance(DAY).unwrap();

    let txn = engine.transaction(&txn.id).unwrap();
    assert_eq!(txn.status, TransactionStatus::Succeeded);
    assert_eq!(txn.history[1].at, 500);
    assert_eq!(txn.history[2].at, 2_500);
}

#[test]
fn test_declined_payments_fail() {
    let config = PaymentConfig::default().payments_per_sec(0.0).failure_rate(1.0);
    let mut engine = PaymentEngine::new(config, 5);
    engine.advance(0).unwrap();

    let txn = succeeded(&mut engine, 1_000);
    assert_eq!(txn.status, TransactionStatus::Failed);
    assert_some!(txn.failure_reason.clone());
    assert_none!(txn.settles_at);
}

#[rstest]
fn test_partial_then_full_refund(mut engine: PaymentEngine) {
    let txn = succeeded(&mut engine, 1_000);

    let partial = PaymentRequest::RefundPayment { id: txn.id.clone(), amount: Some(400) };
    let PaymentResponse::Transaction(after) = engine.apply(&partial).unwrap().value;
    assert_eq!(after.status, TransactionStatus::Succeeded);
    assert_eq!(after.refunded_amount, 400);

    let too_much = PaymentRequest::RefundPayment { id: txn.id.clone(), amount: Some(601) };
    let err = engine.apply(&too_much).unwrap_err();
    assert!(matches!(payment_error(&err), PaymentError::InvalidAmount(601)));

    let rest = PaymentRequest::RefundPayment { id: txn.id.clone(), amount: None };
    let PaymentResponse::Transaction(after) = engine.apply(&rest).unwrap().value;
    assert_eq!(after.status, TransactionStatus::Refunded);
    assert_eq!(after.refundable_amount(), 0);

    let err = engine.apply(&rest).unwrap_err();
    assert!(matches!(payment_error(&err), PaymentError::InvalidTransition(_)));
}

#[rstest]
fn test_refund_requires_succeeded(mut engine: PaymentEngine) {
    let txn = charge(&mut engine, 1_000);
    let err = engine.apply(&PaymentRequest::RefundPayment { id: txn.id, amount: None }).unwrap_err();
    assert!(matches!(payment_error(&err), PaymentError::InvalidTransition(_)));
}

#[rstest]
fn test_settled_payment_is_final(mut engine: PaymentEngine) {
    let txn = succeeded(&mut engine, 1_000);
    let settles_at = txn.settles_at.unwrap();

    engine.advance(settles_at - 1).unwrap();
    let cancel = PaymentRequest::CancelPayment { id: txn.id.clone() };
    let refund = PaymentRequest::RefundPayment { id: txn.id.clone(), amount: Some(1) };
    assert_ok!(engine.apply(&refund));

    engine.advance(settles_at).unwrap();
    for request in [cancel, refund] {
        let err = engine.apply(&request).unwrap_err();
        assert!(matches!(payment_error(&err), PaymentError::InvalidTransition(_)));
    }
    assert_eq!(engine.transaction(&txn.id).unwrap().status, TransactionStatus::Succeeded);
}

#[rstest]
fn test_cancel(mut engine: PaymentEngine) {
    let txn = succeeded(&mut engine, 1_000);
    let PaymentResponse::Transaction(after) =
        engine.apply(&PaymentRequest::CancelPayment { id: txn.id.clone() }).unwrap().value;
    assert_eq!(after.status, TransactionStatus::Cancelled);
    assert_eq!(after.net_amount(), 0);
}

#[rstest]
fn test_cancel_after_partial_refund(mut engine: PaymentEngine) {
    let txn = succeeded(&mut engine, 1_000);
    engine.apply(&PaymentRequest::RefundPayment { id: txn.id.clone(), amount: Some(10) }).unwrap();

    let err = engine.apply(&PaymentRequest::CancelPayment { id: txn.id }).unwrap_err();
    assert!(matches!(payment_error(&err), PaymentError::InvalidTransition(_)));
}

#[rstest]
fn test_unknown_transaction(mut engine: PaymentEngine) {
    let err = engine.apply(&PaymentRequest::CancelPayment { id: "pi_nope".into() }).unwrap_err();
    assert!(matches!(payment_error(&err), PaymentError::TransactionNotFound(_)));
}

#[rstest]
fn test_update_skips_graph_check(mut engine: PaymentEngine) {
    let txn = charge(&mut engine, 1_000);
    let patch = TransactionPatch {
        status: Some(TransactionStatus::Succeeded),
        description: Some("manual".into()),
        ..Default::default()
    };
    let PaymentResponse::Transaction(after) =
        engine.apply(&PaymentRequest::UpdateTransaction { id: txn.id, patch }).unwrap().value;

    assert_eq!(after.status, TransactionStatus::Succeeded);
    assert_eq!(after.description.as_deref(), Some("manual"));
    assert_some!(after.settles_at);
    assert_eq!(engine.log.count(OpKind::Update), 1);
}

#[rstest]
fn test_ledger_is_bounded(mut engine: PaymentEngine) {
    let first = charge(&mut engine, 100);
    for _ in 0..3 {
        charge(&mut engine, 100);
    }
    assert_none!(engine.transaction(&first.id));

    let DomainView::Payment(PaymentView::Transactions(all)) =
        engine.query(&DomainQuery::Payment(PaymentQuery::Transactions { limit: None })).unwrap()
    else {
        panic!("expected transactions");
    };
    assert_eq!(all.len(), 3);

    let DomainMetrics::Payment(domain) = engine.metrics().domain else {
        panic!("expected payment metrics");
    };
    assert_eq!(domain.evicted, 1);
}

#[rstest]
fn test_metrics_volumes(mut engine: PaymentEngine) {
    let a = succeeded(&mut engine, 1_000);
    succeeded(&mut engine, 2_000);
    engine.apply(&PaymentRequest::RefundPayment { id: a.id, amount: Some(500) }).unwrap();

    let snapshot = engine.metrics();
    let DomainMetrics::Payment(ref domain) = snapshot.domain else {
        panic!("expected payment metrics");
    };
    assert_eq!(domain.gross_volume, 3_000);
    assert_eq!(domain.fees_collected, 59 + 88);
    assert_eq!(domain.refunded_volume, 500);
    assert_eq!(domain.net_volume, 3_000 - 147 - 500);
    assert_eq!(domain.success_rate, 1.0);
    assert_eq!(domain.awaiting_settlement, 2);
    assert_eq!(snapshot.entity_count("transactions"), 2);
}

#[rstest]
fn test_query_with_status(mut engine: PaymentEngine) {
    succeeded(&mut engine, 1_000);
    charge(&mut engine, 1_000);

    let query = DomainQuery::Payment(PaymentQuery::WithStatus(TransactionStatus::Pending));
    let DomainView::Payment(PaymentView::Transactions(pending)) = engine.query(&query).unwrap() else {
        panic!("expected transactions");
    };
    assert_eq!(pending.len(), 1);
}

#[test]
fn test_synthetic_load_is_deterministic() {
    let run = || {
        let mut engine = PaymentEngine::new(PaymentConfig::default().payments_per_sec(20.0).refund_rate(0.3), 11);
        engine.advance(0).unwrap();
        for t in 1..=10 {
            engine.advance(t * SECOND).unwrap();
        }
        engine.metrics()
    };

    let first = run();
    assert_eq!(first, run());
    assert_ge!(first.operations.counts_by_kind[&OpKind::Charge], 100);
    assert_gt!(first.operations.counts_by_kind.get(&OpKind::Refund).copied().unwrap_or(0), 0);
}

#[rstest]
fn test_huge_amounts_saturate_volumes(mut engine: PaymentEngine) {
    let first = succeeded(&mut engine, u64::MAX);
    succeeded(&mut engine, u64::MAX);
    assert_eq!(first.net_amount(), i64::MAX);

    let DomainMetrics::Payment(domain) = engine.metrics().domain else {
        panic!("expected payment metrics");
    };
    assert_eq!(domain.gross_volume, u64::MAX);
    assert_eq!(domain.net_volume, i64::MAX);
}
