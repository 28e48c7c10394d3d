//! Payment gateway: a ledger of charges moving through pending → processing → succeeded/failed,
//! with refunds and cancellations allowed until the charge settles.
mod config;
mod model;

use std::collections::{
    BTreeMap,
    VecDeque,
};

use em_core::err_impl;
use em_core::errors::bail;
use em_core::prelude::*;
use em_core::stats;
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{
    Distribution,
    Exp,
};
use serde::{
    Deserialize,
    Serialize,
};
use tracing::debug;

pub use self::config::*;
pub use self::model::*;
use crate::config::{
    ComponentConfig,
    ComponentKind,
};
use crate::engine::{
    expect_variant,
    settle,
    Completed,
    DomainQuery,
    DomainView,
    OpContext,
    OperationRequest,
    OperationResult,
    ResponseDetail,
    RoutingEngine,
};
use crate::errors::EngineError;
use crate::load::{
    chance,
    hex_id,
    rng_from_seed,
    LoadGenerator,
};
use crate::metrics::{
    DomainMetrics,
    MetricsSnapshot,
};

const DECLINE_REASONS: [&str; 3] = ["card_declined", "insufficient_funds", "expired_card"];

err_impl! {PaymentError,
    #[error("transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(u64),
}

/// An explicit payment gateway operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PaymentRequest {
    /// Open a charge in `pending`.
    CreatePayment {
        /// Charge in minor units; must be positive.
        amount: u64,
        /// Defaults to the configured currency.
        #[serde(default)]
        currency: Option<String>,
        /// Free-form note.
        #[serde(default)]
        description: Option<String>,
    },

    /// Refund `amount`, or whatever is left to refund if `None`.
    RefundPayment {
        /// Transaction to refund.
        id: String,
        /// Amount in minor units.
        #[serde(default)]
        amount: Option<u64>,
    },
    /// Cancel a succeeded, unsettled charge with no refunds.
    CancelPayment {
        /// Transaction to cancel.
        id: String,
    },
    /// Overwrite transaction fields directly.
    UpdateTransaction {
        /// Transaction to edit.
        id: String,
        /// Fields to overwrite.
        patch: TransactionPatch,
    },
}

impl PaymentRequest {
    /// Operation kind recorded in the log for this request.
    #[must_use]
    pub const fn op_kind(&self) -> OpKind {
        match self {
            Self::CreatePayment { .. } => OpKind::Charge,
            Self::RefundPayment { .. } => OpKind::Refund,
            Self::CancelPayment { .. } => OpKind::Cancel,
            Self::UpdateTransaction { .. } => OpKind::Update,
        }
    }
}

/// Result of a [`PaymentRequest`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PaymentResponse {
    /// The transaction after the operation.
    Transaction(Transaction),
}

/// Read-only payment queries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PaymentQuery {
    /// One transaction by id.
    Transaction(String),

    /// Newest first.
    Transactions {
        /// At most this many; all if `None`.
        limit: Option<usize>,
    },
    /// Transactions currently in one status.
    WithStatus(TransactionStatus),
    /// The newest operation records.
    RecentOperations {
        /// At most this many records.
        limit: usize,
    },
}

/// Answer to a [`PaymentQuery`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PaymentView {
    /// One transaction.
    Transaction(Transaction),
    /// Several transactions.
    Transactions(Vec<Transaction>),
    /// Operation records.
    Operations(Vec<OperationRecord>),
}

/// Payment gateway part of a node's metrics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMetrics {
    /// Ledger entries per status.
    pub transactions_by_status: BTreeMap<TransactionStatus, u64>,

    /// Sum of succeeded (and later refunded) charges, in minor units.
    pub gross_volume: u64,
    /// Fees on those charges.
    pub fees_collected: u64,
    /// Refunds issued on those charges.
    pub refunded_volume: u64,
    /// Gross volume less fees and refunds.
    pub net_volume: i64,
    /// Charges past their settlement time.
    pub settled: u64,
    /// Succeeded charges not yet settled.
    pub awaiting_settlement: u64,

    /// Succeeded over decided (succeeded + failed) charges.
    pub success_rate: f64,
    /// Transactions dropped from the ledger to stay within `maxTransactions`.
    pub evicted: u64,
}

/// Simulated payment gateway with a bounded transaction ledger.
pub struct PaymentEngine {
    config: PaymentConfig,
    transactions: BTreeMap<String, Transaction>,
    order: VecDeque<String>,
    evicted: u64,
    log: OperationLog,
    load: LoadGenerator,
    rng: StdRng,
    now: SimTime,
}

impl PaymentEngine {
    /// Empty ledger seeded for reproducible load.
    #[must_use]
    pub fn new(config: PaymentConfig, seed: u64) -> Self {
        Self {
            config,
            transactions: BTreeMap::new(),
            order: VecDeque::new(),
            evicted: 0,
            log: OperationLog::default(),
            load: LoadGenerator::new(),
            rng: rng_from_seed(seed),
            now: 0,
        }
    }

    /// Look up a transaction by id.
    #[must_use]
    pub fn transaction(&self, id: &str) -> Option<&Transaction> {
        self.transactions.get(id)
    }

    /// Run an explicit operation against the ledger.
    pub fn apply(&mut self, request: &PaymentRequest) -> anyhow::Result<Completed<PaymentResponse>> {
        let outcome = match request {
            PaymentRequest::CreatePayment { amount, currency, description } => {
                self.create_payment(*amount, currency.as_deref(), description.as_deref())
            },
            PaymentRequest::RefundPayment { id, amount } => self.refund_payment(id, *amount),
            PaymentRequest::CancelPayment { id } => self.cancel_payment(id),
            PaymentRequest::UpdateTransaction { id, patch } => self.update_transaction(id, patch),
        };

        let target = match (&outcome, request) {
            (Ok(Completed { value: PaymentResponse::Transaction(txn), .. }), _) => txn.currency.clone(),
            (Err(_), PaymentRequest::CreatePayment { currency, .. }) => {
                currency.clone().unwrap_or_else(|| self.config.currency.clone())
            },
            _ => self.config.currency.clone(),
        };
        let mut ctx = OpContext::new(self.now, request.op_kind(), &target);
        if let Ok(Completed { value: PaymentResponse::Transaction(txn), .. }) = &outcome {
            if request.op_kind() == OpKind::Charge {
                ctx = ctx.sized(txn.amount);
            }
        }
        settle(&mut self.log, &ctx, outcome)
    }

    fn create_payment(
        &mut self,
        amount: u64,
        currency: Option<&str>,
        description: Option<&str>,
    ) -> anyhow::Result<Completed<PaymentResponse>> {
        if amount == 0 {
            return Err(PaymentError::invalid_amount(&amount));
        }
        let id = format!("pi_{}", hex_id(&mut self.rng));
        let currency = currency.map_or_else(|| self.config.currency.clone(), str::to_ascii_lowercase);
        let mut txn = Transaction::new(&id, amount, &currency, self.now);
        txn.description = description.map(Into::into);

        self.order.push_back(id.clone());
        self.transactions.insert(id, txn.clone());
        self.evict();
        Ok(Completed::new(120.0, PaymentResponse::Transaction(txn)))
    }

    fn txn_mut(&mut self, id: &str) -> anyhow::Result<&mut Transaction> {
        self.transactions.get_mut(id).ok_or_else(|| PaymentError::transaction_not_found(id))
    }

    /// Check the edge from the current status, and that the charge hasn't settled yet.
    fn guard(txn: &Transaction, next: TransactionStatus, now: SimTime) -> EmptyResult {
        if !txn.status.can_transition_to(next) {
            bail!(PaymentError::invalid_transition(&format!("{} is {}, can't become {next}", txn.id, txn.status)));
        }
        if txn.is_settled(now) {
            bail!(PaymentError::invalid_transition(&format!("{} has settled", txn.id)));
        }
        Ok(())
    }

    fn refund_payment(&mut self, id: &str, amount: Option<u64>) -> anyhow::Result<Completed<PaymentResponse>> {
        let now = self.now;
        let txn = self.txn_mut(id)?;
        Self::guard(txn, TransactionStatus::Refunded, now)?;

        let remaining = txn.refundable_amount();
        let amount = amount.unwrap_or(remaining);
        if amount == 0 || amount > remaining {
            return Err(PaymentError::invalid_amount(&amount));
        }
        txn.refunded_amount += amount;
        if txn.refunded_amount == txn.amount {
            txn.set_status(TransactionStatus::Refunded, now);
        } else {
            txn.updated_at = now;
        }
        Ok(Completed::new(150.0, PaymentResponse::Transaction(txn.clone())))
    }

    fn cancel_payment(&mut self, id: &str) -> anyhow::Result<Completed<PaymentResponse>> {
        let now = self.now;
        let txn = self.txn_mut(id)?;
        Self::guard(txn, TransactionStatus::Cancelled, now)?;
        if txn.refunded_amount > 0 {
            bail!(PaymentError::invalid_transition(&format!("{id} has been partially refunded")));
        }
        txn.set_status(TransactionStatus::Cancelled, now);
        Ok(Completed::new(90.0, PaymentResponse::Transaction(txn.clone())))
    }

    fn update_transaction(&mut self, id: &str, patch: &TransactionPatch) -> anyhow::Result<Completed<PaymentResponse>> {
        let now = self.now;
        let settlement_delay = self.settlement_delay();
        let txn = self.txn_mut(id)?;
        if let Some(amount) = patch.amount {
            txn.amount = amount;
        }
        if let Some(fee) = patch.fee {
            txn.fee = fee;
        }
        if let Some(refunded) = patch.refunded_amount {
            txn.refunded_amount = refunded;
        }
        if let Some(description) = &patch.description {
            txn.description = Some(description.clone());
        }
        if let Some(status) = patch.status {
            if status == TransactionStatus::Succeeded && txn.settles_at.is_none() {
                txn.settles_at = Some(now + settlement_delay);
            }
            txn.set_status(status, now);
        }
        txn.updated_at = now;
        Ok(Completed::new(60.0, PaymentResponse::Transaction(txn.clone())))
    }

    fn settlement_delay(&self) -> SimTime {
        i64::try_from(self.config.settlement_delay_secs).unwrap_or(i64::MAX / SECOND) * SECOND
    }

    fn evict(&mut self) {
        while self.order.len() > self.config.max_transactions {
            if let Some(oldest) = self.order.pop_front() {
                self.transactions.remove(&oldest);
                self.evicted += 1;
            }
        }
    }

    /// Drive every in-flight charge forward along the graph.  A large time jump can take a charge
    /// through several steps; each step is stamped with the time it was due, not `now`.
    fn auto_advance(&mut self) {
        let now = self.now;
        let auth = i64::try_from(self.config.authorization_delay_ms).unwrap_or(i64::MAX);
        let processing = i64::try_from(self.config.processing_delay_ms).unwrap_or(i64::MAX);
        let settlement_delay = self.settlement_delay();

        for txn in self.transactions.values_mut() {
            if txn.status == TransactionStatus::Pending {
                let due = txn.updated_at.saturating_add(auth);
                if now < due {
                    continue;
                }
                txn.set_status(TransactionStatus::Processing, due);
            }
            if txn.status == TransactionStatus::Processing {
                let due = txn.updated_at.saturating_add(processing);
                if now < due {
                    continue;
                }
                if chance(&mut self.rng, self.config.failure_rate) {
                    let reason = DECLINE_REASONS[self.rng.gen_range(0..DECLINE_REASONS.len())];
                    debug!(id = %txn.id, reason, "payment declined");
                    txn.failure_reason = Some(reason.into());
                    txn.set_status(TransactionStatus::Failed, due);
                } else {
                    txn.fee = self.config.fee_for(txn.amount);
                    txn.settles_at = Some(due.saturating_add(settlement_delay));
                    txn.set_status(TransactionStatus::Succeeded, due);
                }
            }
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    fn synthetic_request(&mut self) {
        if chance(&mut self.rng, self.config.refund_rate) {
            let now = self.now;
            let candidates: Vec<_> = self
                .transactions
                .values()
                .filter(|t| t.status == TransactionStatus::Succeeded && t.refunded_amount == 0 && !t.is_settled(now))
                .map(|t| t.id.clone())
                .collect();
            if !candidates.is_empty() {
                let id = candidates[self.rng.gen_range(0..candidates.len())].clone();
                let _ = self.apply(&PaymentRequest::RefundPayment { id, amount: None });
                return;
            }
        }

        let mean = self.config.mean_amount as f64;
        let amount = match Exp::new(1.0 / mean) {
            Ok(dist) => (dist.sample(&mut self.rng).round() as u64).max(50),
            Err(_) => self.config.mean_amount,
        };
        let _ = self.apply(&PaymentRequest::CreatePayment { amount, currency: None, description: None });
    }

    fn payment_query(&self, query: &PaymentQuery) -> anyhow::Result<PaymentView> {
        let view = match query {
            PaymentQuery::Transaction(id) => PaymentView::Transaction(
                self.transactions.get(id).cloned().ok_or_else(|| PaymentError::transaction_not_found(id))?,
            ),
            PaymentQuery::Transactions { limit } => PaymentView::Transactions(
                self.order
                    .iter()
                    .rev()
                    .filter_map(|id| self.transactions.get(id))
                    .take(limit.unwrap_or(usize::MAX))
                    .cloned()
                    .collect(),
            ),
            PaymentQuery::WithStatus(status) => PaymentView::Transactions(
                self.order
                    .iter()
                    .rev()
                    .filter_map(|id| self.transactions.get(id))
                    .filter(|t| t.status == *status)
                    .cloned()
                    .collect(),
            ),
            PaymentQuery::RecentOperations { limit } => PaymentView::Operations(self.log.recent(*limit)),
        };
        Ok(view)
    }

    fn snapshot(&self) -> MetricsSnapshot {
        let mut domain = PaymentMetrics { evicted: self.evicted, ..Default::default() };
        for txn in self.transactions.values() {
            *domain.transactions_by_status.entry(txn.status).or_default() += 1;
            if matches!(txn.status, TransactionStatus::Succeeded | TransactionStatus::Refunded) {
                domain.gross_volume = domain.gross_volume.saturating_add(txn.amount);
                domain.fees_collected = domain.fees_collected.saturating_add(txn.fee);
                domain.refunded_volume = domain.refunded_volume.saturating_add(txn.refunded_amount);
                domain.net_volume = domain.net_volume.saturating_add(txn.net_amount());
                if txn.is_settled(self.now) {
                    domain.settled += 1;
                } else if txn.status == TransactionStatus::Succeeded {
                    domain.awaiting_settlement += 1;
                }
            }
        }
        let count = |s| domain.transactions_by_status.get(&s).copied().unwrap_or(0);
        let succeeded = count(TransactionStatus::Succeeded) + count(TransactionStatus::Refunded);
        domain.success_rate = stats::ratio(succeeded, succeeded + count(TransactionStatus::Failed));

        let snapshot = MetricsSnapshot::from_log(ComponentKind::PaymentGateway, &self.log, self.now);
        let charges = self.log.snapshot();
        let charges = charges.iter().filter(|r| r.kind == OpKind::Charge && !r.is_error()).map(|r| r.timestamp);
        let tps = stats::throughput(charges, self.now, stats::DEFAULT_RATE_WINDOW);
        let in_flight = count(TransactionStatus::Pending) + count(TransactionStatus::Processing);

        snapshot
            .with_count("transactions", self.transactions.len() as u64)
            .with_count("inFlight", in_flight)
            .with_utilization("tps", stats::utilization(tps, self.config.capacity_tps))
            .with_domain(DomainMetrics::Payment(domain))
    }
}

impl RoutingEngine for PaymentEngine {
    fn kind(&self) -> ComponentKind {
        ComponentKind::PaymentGateway
    }

    fn reconfigure(&mut self, config: &ComponentConfig) -> EmptyResult {
        let config = expect_variant!(config, ComponentConfig::PaymentGateway, "payment config")?;
        self.config = config.clone();
        self.evict();
        Ok(())
    }

    fn advance(&mut self, now: SimTime) -> EmptyResult {
        if now < self.now {
            return Ok(());
        }
        for at in self.load.due(now, self.config.payments_per_sec) {
            self.now = at;
            self.auto_advance();
            self.synthetic_request();
        }
        self.now = now;
        self.auto_advance();
        Ok(())
    }

    fn execute(&mut self, request: &OperationRequest) -> anyhow::Result<OperationResult> {
        let request = expect_variant!(request, OperationRequest::Payment, "payment request")?;
        let done = self.apply(request)?;
        Ok(OperationResult { latency_ms: done.latency_ms, detail: ResponseDetail::Payment(done.value) })
    }

    fn query(&self, query: &DomainQuery) -> anyhow::Result<DomainView> {
        match query {
            DomainQuery::Payment(q) => Ok(DomainView::Payment(self.payment_query(q)?)),
            other => Err(EngineError::unsupported_query(&format!("{other:?}"))),
        }
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.snapshot()
    }
}

#[cfg(test)]
mod tests;
