use derive_setters::Setters;
use serde::{
    Deserialize,
    Serialize,
};

use crate::config::sanitize_f64;

/// Payment gateway settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Setters)]
#[serde(default, rename_all = "camelCase")]
pub struct PaymentConfig {
    /// Synthetic charge rate.
    pub payments_per_sec: f64,

    /// Fraction of synthetic operations that refund an earlier payment instead of charging.
    pub refund_rate: f64,

    /// Fraction of payments the processor declines.
    pub failure_rate: f64,

    /// Mean charge, in minor currency units.
    pub mean_amount: u64,
    /// Default ISO currency code, lowercase.
    pub currency: String,
    /// Percentage fee taken from each succeeded charge.
    pub fee_percent: f64,

    /// Flat per-charge fee, in minor currency units.
    pub fee_fixed: u64,

    /// Time a new payment sits in `pending` before processing starts.
    pub authorization_delay_ms: u64,

    /// Time a payment spends in `processing`.
    pub processing_delay_ms: u64,

    /// After this long a succeeded payment is final and can no longer be refunded or cancelled.
    pub settlement_delay_secs: u64,

    /// Ledger size; the oldest transactions are dropped beyond it.
    pub max_transactions: usize,

    /// Charges per second the gateway account is provisioned for.
    pub capacity_tps: f64,
    /// Seed for the node's generator; random if unset.
    pub seed: Option<u64>,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            payments_per_sec: 1.0,
            refund_rate: 0.05,
            failure_rate: 0.03,
            mean_amount: 5_000,
            currency: "usd".into(),
            fee_percent: 2.9,
            fee_fixed: 30,
            authorization_delay_ms: 500,
            processing_delay_ms: 2_000,
            settlement_delay_secs: 2 * 24 * 3600,
            max_transactions: 1_000,
            capacity_tps: 100.0,
            seed: None,
        }
    }
}

impl PaymentConfig {
    pub(crate) fn normalize(&mut self) {
        let defaults = Self::default();
        sanitize_f64(&mut self.payments_per_sec, 0.0, 10_000.0, defaults.payments_per_sec, "paymentsPerSec");
        sanitize_f64(&mut self.refund_rate, 0.0, 1.0, defaults.refund_rate, "refundRate");
        sanitize_f64(&mut self.failure_rate, 0.0, 1.0, defaults.failure_rate, "failureRate");
        sanitize_f64(&mut self.fee_percent, 0.0, 100.0, defaults.fee_percent, "feePercent");
        sanitize_f64(&mut self.capacity_tps, f64::MIN_POSITIVE, f64::MAX, defaults.capacity_tps, "capacityTps");
        if self.mean_amount == 0 {
            self.mean_amount = defaults.mean_amount;
        }
        if self.max_transactions == 0 {
            self.max_transactions = defaults.max_transactions;
        }
        if self.currency.trim().is_empty() {
            self.currency = defaults.currency;
        } else {
            self.currency = self.currency.trim().to_ascii_lowercase();
        }
    }

    /// `round(amount * feePercent / 100) + feeFixed`, in minor units.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    #[must_use]
    pub fn fee_for(&self, amount: u64) -> u64 {
        ((amount as f64 * self.fee_percent / 100.0).round() as u64).saturating_add(self.fee_fixed)
    }
}
