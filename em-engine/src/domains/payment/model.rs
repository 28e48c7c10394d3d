use std::fmt;

use em_core::time::SimTime;
use serde::{
    Deserialize,
    Serialize,
};

/// Lifecycle state of a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    /// Awaiting authorization.
    Pending,
    /// Being processed.
    Processing,
    /// Charged; refundable until settled.
    Succeeded,
    /// Declined by the processor.
    Failed,
    /// Fully refunded.
    Refunded,
    /// Cancelled before settlement.
    Cancelled,
}

impl TransactionStatus {
    /// Edges of the payment state graph.  `Failed`, `Refunded` and `Cancelled` are terminal.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Succeeded | Self::Failed)
                | (Self::Succeeded, Self::Refunded | Self::Cancelled)
        )
    }

    /// No further transitions are allowed.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Refunded | Self::Cancelled)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One entry in a transaction's status history.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    /// State entered.
    pub status: TransactionStatus,
    /// When it was entered.
    pub at: SimTime,
}

/// Amounts are integer minor units (cents).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Gateway-assigned id.
    pub id: String,
    /// Charge amount.
    pub amount: u64,
    /// ISO currency code, lowercase.
    pub currency: String,
    /// Fee taken on success.
    pub fee: u64,
    /// Total refunded so far.
    pub refunded_amount: u64,
    /// Current state.
    pub status: TransactionStatus,
    /// Caller-supplied note.
    pub description: Option<String>,
    /// Why the processor declined, for failed charges.
    pub failure_reason: Option<String>,
    /// Creation time.
    pub created_at: SimTime,
    /// Time of the last change.
    pub updated_at: SimTime,

    /// When the payment becomes final; set once it succeeds.
    pub settles_at: Option<SimTime>,
    /// Every state entered, oldest first.
    pub history: Vec<StatusChange>,
}

impl Transaction {
    /// Pending charge with its history started.
    #[must_use]
    pub fn new(id: &str, amount: u64, currency: &str, now: SimTime) -> Self {
        Self {
            id: id.into(),
            amount,
            currency: currency.into(),
            fee: 0,
            refunded_amount: 0,
            status: TransactionStatus::Pending,
            description: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            settles_at: None,
            history: vec![StatusChange { status: TransactionStatus::Pending, at: now }],
        }
    }

    /// Whether the settlement time has passed.
    #[must_use]
    pub fn is_settled(&self, now: SimTime) -> bool {
        self.settles_at.is_some_and(|t| now >= t)
    }

    /// Amount not yet refunded.
    #[must_use]
    pub const fn refundable_amount(&self) -> u64 {
        self.amount.saturating_sub(self.refunded_amount)
    }

    /// What the merchant keeps.
    #[must_use]
    pub fn net_amount(&self) -> i64 {
        match self.status {
            TransactionStatus::Succeeded | TransactionStatus::Refunded => {
                let net = i128::from(self.amount) - i128::from(self.fee) - i128::from(self.refunded_amount);
                i64::try_from(net).unwrap_or(if net < 0 { i64::MIN } else { i64::MAX })
            },
            _ => 0,
        }
    }

    pub(super) fn set_status(&mut self, status: TransactionStatus, at: SimTime) {
        self.status = status;
        self.updated_at = at;
        self.history.push(StatusChange { status, at });
    }
}

/// Free-form edit from the config UI.  Applied as-is; the state graph is not checked.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransactionPatch {
    /// New state.
    pub status: Option<TransactionStatus>,
    /// New amount.
    pub amount: Option<u64>,
    /// New fee.
    pub fee: Option<u64>,
    /// New refunded total.
    pub refunded_amount: Option<u64>,
    /// New note.
    pub description: Option<String>,
}
