//! Customer model
//!
//! Represents a customer account. The `balance_usd_cents` field is a live
//! mirror of the customer's on-chain escrow balance; billing reads and
//! writes it only while holding the customer lock.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::PaymentSource;

/// Customer entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    /// Unique identifier
    pub id: i64,

    /// On-chain wallet address (authenticated identity, verified upstream)
    pub wallet_address: String,

    /// On-chain escrow account object reference
    pub escrow_object_id: Option<String>,

    /// Live USD-cent mirror of the on-chain escrow balance
    pub balance_usd_cents: i64,

    /// Per-charge spending limit in USD cents (0 = unlimited)
    pub spending_limit_usd_cents: i64,

    /// Start of the customer's current billing period
    pub billing_period_start: NaiveDate,

    /// Payment providers in the order settlement should try them
    pub provider_priority: Vec<PaymentSource>,

    /// Card processor customer reference
    pub stripe_customer_id: Option<String>,

    /// Attached card payment method reference
    pub card_payment_method_id: Option<String>,

    /// Whether the attached card is usable for charges
    pub card_active: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    /// Whether the mirrored escrow balance covers `amount_cents`
    #[inline]
    pub fn escrow_covers(&self, amount_cents: i64) -> bool {
        self.balance_usd_cents >= amount_cents
    }

    /// Whether `amount_cents` is within the configured spending limit
    #[inline]
    pub fn within_spending_limit(&self, amount_cents: i64) -> bool {
        self.spending_limit_usd_cents == 0 || amount_cents <= self.spending_limit_usd_cents
    }

    /// Whether a usable card payment method is attached
    pub fn has_active_card(&self) -> bool {
        self.card_active && self.card_payment_method_id.is_some()
    }

    /// The provider order settlement should use; defaults to escrow-then-card
    /// if the customer never configured one.
    pub fn provider_chain(&self) -> Vec<PaymentSource> {
        if self.provider_priority.is_empty() {
            vec![PaymentSource::Escrow, PaymentSource::Stripe]
        } else {
            self.provider_priority.clone()
        }
    }
}

impl Default for Customer {
    fn default() -> Self {
        Self {
            id: 0,
            wallet_address: String::new(),
            escrow_object_id: None,
            balance_usd_cents: 0,
            spending_limit_usd_cents: 0,
            billing_period_start: NaiveDate::from_ymd_opt(1970, 1, 1).unwrap(),
            provider_priority: Vec::new(),
            stripe_customer_id: None,
            card_payment_method_id: None,
            card_active: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escrow_covers() {
        let customer = Customer {
            balance_usd_cents: 5_000,
            ..Default::default()
        };
        assert!(customer.escrow_covers(5_000));
        assert!(!customer.escrow_covers(5_001));
    }

    #[test]
    fn test_spending_limit_zero_is_unlimited() {
        let customer = Customer {
            spending_limit_usd_cents: 0,
            ..Default::default()
        };
        assert!(customer.within_spending_limit(i64::MAX));

        let limited = Customer {
            spending_limit_usd_cents: 10_000,
            ..Default::default()
        };
        assert!(limited.within_spending_limit(10_000));
        assert!(!limited.within_spending_limit(10_001));
    }

    #[test]
    fn test_default_provider_chain() {
        let customer = Customer::default();
        assert_eq!(
            customer.provider_chain(),
            vec![PaymentSource::Escrow, PaymentSource::Stripe]
        );

        let configured = Customer {
            provider_priority: vec![PaymentSource::Stripe, PaymentSource::Escrow],
            ..Default::default()
        };
        assert_eq!(
            configured.provider_chain(),
            vec![PaymentSource::Stripe, PaymentSource::Escrow]
        );
    }
}
