//! Escrow transaction mirror
//!
//! Append-only mirror of on-chain charge/deposit/withdraw operations.
//! Amounts are stored in decimal DOLLARS, the chain's native unit — the one
//! deliberate unit inconsistency in the model. Chain-reconciliation tooling
//! depends on the dollar representation; do not normalize it to cents.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// On-chain escrow operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscrowOperation {
    /// Platform charged the escrow account
    Charge,
    /// Customer deposited into escrow
    Deposit,
    /// Customer withdrew from escrow
    Withdraw,
}

impl fmt::Display for EscrowOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EscrowOperation::Charge => write!(f, "charge"),
            EscrowOperation::Deposit => write!(f, "deposit"),
            EscrowOperation::Withdraw => write!(f, "withdraw"),
        }
    }
}

impl EscrowOperation {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "charge" => Some(EscrowOperation::Charge),
            "deposit" => Some(EscrowOperation::Deposit),
            "withdraw" => Some(EscrowOperation::Withdraw),
            _ => None,
        }
    }
}

/// Escrow transaction entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowTransaction {
    pub id: Uuid,
    pub customer_id: i64,
    pub operation: EscrowOperation,

    /// Amount in decimal dollars (chain-native unit, NOT cents)
    pub amount_usd: Decimal,

    /// On-chain transaction digest
    pub tx_digest: String,

    /// Invoice settled by this transaction, for charges
    pub billing_record_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,
}

impl EscrowTransaction {
    pub fn charge(
        customer_id: i64,
        amount_usd: Decimal,
        tx_digest: impl Into<String>,
        billing_record_id: Uuid,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            customer_id,
            operation: EscrowOperation::Charge,
            amount_usd,
            tx_digest: tx_digest.into(),
            billing_record_id: Some(billing_record_id),
            created_at: Utc::now(),
        }
    }
}

/// Convert integer cents into the decimal-dollar unit used on-chain
pub fn cents_to_dollars(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

/// Convert decimal dollars into integer cents, truncating sub-cent dust
pub fn dollars_to_cents(dollars: Decimal) -> i64 {
    use rust_decimal::prelude::ToPrimitive;
    (dollars * Decimal::from(100)).trunc().to_i64().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_cents_to_dollars() {
        assert_eq!(cents_to_dollars(15_000), dec!(150.00));
        assert_eq!(cents_to_dollars(1), dec!(0.01));
        assert_eq!(cents_to_dollars(0), dec!(0.00));
    }

    #[test]
    fn test_dollars_to_cents_truncates() {
        assert_eq!(dollars_to_cents(dec!(150.00)), 15_000);
        assert_eq!(dollars_to_cents(dec!(0.019)), 1);
    }

    #[test]
    fn test_unit_roundtrip() {
        for cents in [0_i64, 1, 99, 100, 15_000, 1_850_000] {
            assert_eq!(dollars_to_cents(cents_to_dollars(cents)), cents);
        }
    }
}
