//! Invoice payment model
//!
//! One row per successful partial or full settlement of an invoice from one
//! source. The `(source, reference_id)` pair is unique, which is what makes
//! settlement retries idempotent at the ledger level.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Where settlement money came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentSource {
    /// Account credit
    Credit,
    /// On-chain escrow balance
    Escrow,
    /// Card processor
    Stripe,
    /// PayPal (not yet live)
    Paypal,
}

impl fmt::Display for PaymentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentSource::Credit => write!(f, "credit"),
            PaymentSource::Escrow => write!(f, "escrow"),
            PaymentSource::Stripe => write!(f, "stripe"),
            PaymentSource::Paypal => write!(f, "paypal"),
        }
    }
}

impl PaymentSource {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "credit" => Some(PaymentSource::Credit),
            "escrow" => Some(PaymentSource::Escrow),
            "stripe" => Some(PaymentSource::Stripe),
            "paypal" => Some(PaymentSource::Paypal),
            _ => None,
        }
    }

    /// Sources a provider chain may contain (credit is applied before the
    /// chain runs, not by a provider)
    pub fn is_provider(&self) -> bool {
        !matches!(self, PaymentSource::Credit)
    }
}

/// Invoice payment entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoicePayment {
    pub id: Uuid,
    pub billing_record_id: Uuid,
    pub source: PaymentSource,
    pub amount_usd_cents: i64,

    /// Identifier unique to the source: credit id, escrow transaction
    /// digest, or provider charge id
    pub reference_id: String,

    pub created_at: DateTime<Utc>,
}

impl InvoicePayment {
    pub fn new(
        billing_record_id: Uuid,
        source: PaymentSource,
        amount_usd_cents: i64,
        reference_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            billing_record_id,
            source,
            amount_usd_cents,
            reference_id: reference_id.into(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_roundtrip() {
        for source in [
            PaymentSource::Credit,
            PaymentSource::Escrow,
            PaymentSource::Stripe,
            PaymentSource::Paypal,
        ] {
            assert_eq!(PaymentSource::from_str(&source.to_string()), Some(source));
        }
        assert_eq!(PaymentSource::from_str("venmo"), None);
    }

    #[test]
    fn test_credit_is_not_a_provider() {
        assert!(!PaymentSource::Credit.is_provider());
        assert!(PaymentSource::Escrow.is_provider());
        assert!(PaymentSource::Stripe.is_provider());
    }
}
