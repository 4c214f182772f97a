//! Payment providers for Stratus Billing
//!
//! A closed set of payment backends behind one capability interface.
//! Settlement asks each provider, in the customer's configured priority
//! order, whether it can pay a given amount right now, and charges the
//! first one that can. Provider failures are data, not exceptions: `charge`
//! always returns a `ChargeOutcome`.

pub mod escrow;
pub mod paypal;
pub mod stripe;

pub use escrow::{ChainAccount, ChainError, ChainReceipt, EscrowBackend, EscrowProvider};
pub use paypal::PaypalProvider;
pub use stripe::{CardGateway, CardProvider, GatewayCharge, GatewayChargeStatus, GatewayError};

use async_trait::async_trait;
use std::sync::Arc;
use stratus_core::models::{Customer, PaymentSource};
use uuid::Uuid;

/// A request to charge a customer for (part of) an invoice
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub billing_record_id: Uuid,
    pub amount_usd_cents: i64,
    pub description: String,
}

/// Classified provider failure causes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorCode {
    /// Explicit decline; retrying server-side will not help
    CardDeclined,
    /// Customer must complete out-of-band authentication (3-D Secure)
    RequiresAction,
    /// Escrow balance below the requested amount
    InsufficientFunds,
    /// Amount exceeds the customer's configured spending limit
    SpendingLimitExceeded,
    /// Provider not set up for this customer
    NotConfigured,
    /// Generic or transient processing error
    ProcessingError,
}

/// Result of a provider charge attempt
#[derive(Debug, Clone)]
pub enum ChargeOutcome {
    Success {
        /// Provider-unique settlement reference (charge id or tx digest)
        reference_id: String,
        /// On-chain digest, for escrow settlements
        tx_digest: Option<String>,
    },
    Failure {
        error: String,
        code: ProviderErrorCode,
        /// Whether an automatic retry may succeed
        retryable: bool,
        /// Hosted authentication URL, when the provider requires one
        hosted_action_url: Option<String>,
    },
}

impl ChargeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ChargeOutcome::Success { .. })
    }
}

/// Display information about a configured provider
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProviderInfo {
    pub source: PaymentSource,
    pub label: String,
    pub detail: Option<String>,
}

/// Common capability interface over payment backends
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Which ledger source this provider settles from
    fn source(&self) -> PaymentSource;

    /// Whether the provider is set up for this customer at all
    fn is_configured(&self, customer: &Customer) -> bool;

    /// Cheap eligibility check: can this provider pay `amount_cents` for
    /// this customer right now?
    fn can_pay(&self, customer: &Customer, amount_cents: i64) -> bool;

    /// Attempt the charge. Never errors; failures are in the outcome.
    async fn charge(&self, customer: &Customer, request: &ChargeRequest) -> ChargeOutcome;

    /// Display info for the payment-methods API, if configured
    fn get_info(&self, customer: &Customer) -> Option<ProviderInfo>;
}

/// The set of live providers, resolvable by source
#[derive(Clone)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn PaymentProvider>>,
}

impl ProviderRegistry {
    pub fn new(providers: Vec<Arc<dyn PaymentProvider>>) -> Self {
        Self { providers }
    }

    /// Look up a provider by source
    pub fn get(&self, source: PaymentSource) -> Option<&dyn PaymentProvider> {
        self.providers
            .iter()
            .find(|p| p.source() == source)
            .map(AsRef::as_ref)
    }

    /// The providers to try for this customer, in the customer's configured
    /// priority order. Sources with no registered provider are skipped.
    pub fn chain_for(&self, customer: &Customer) -> Vec<&dyn PaymentProvider> {
        customer
            .provider_chain()
            .into_iter()
            .filter(|s| s.is_provider())
            .filter_map(|s| self.get(s))
            .collect()
    }

    /// Display info for every provider configured for this customer
    pub fn infos_for(&self, customer: &Customer) -> Vec<ProviderInfo> {
        self.providers
            .iter()
            .filter_map(|p| p.get_info(customer))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullProvider(PaymentSource);

    #[async_trait]
    impl PaymentProvider for NullProvider {
        fn source(&self) -> PaymentSource {
            self.0
        }

        fn is_configured(&self, _customer: &Customer) -> bool {
            true
        }

        fn can_pay(&self, _customer: &Customer, _amount_cents: i64) -> bool {
            false
        }

        async fn charge(&self, _customer: &Customer, _request: &ChargeRequest) -> ChargeOutcome {
            ChargeOutcome::Failure {
                error: "null provider".to_string(),
                code: ProviderErrorCode::NotConfigured,
                retryable: false,
                hosted_action_url: None,
            }
        }

        fn get_info(&self, _customer: &Customer) -> Option<ProviderInfo> {
            None
        }
    }

    #[test]
    fn test_registry_respects_customer_priority() {
        let registry = ProviderRegistry::new(vec![
            Arc::new(NullProvider(PaymentSource::Escrow)),
            Arc::new(NullProvider(PaymentSource::Stripe)),
        ]);

        let customer = Customer {
            provider_priority: vec![PaymentSource::Stripe, PaymentSource::Escrow],
            ..Default::default()
        };

        let chain = registry.chain_for(&customer);
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].source(), PaymentSource::Stripe);
        assert_eq!(chain[1].source(), PaymentSource::Escrow);
    }

    #[test]
    fn test_registry_skips_credit_and_unknown_sources() {
        let registry = ProviderRegistry::new(vec![Arc::new(NullProvider(PaymentSource::Escrow))]);

        let customer = Customer {
            provider_priority: vec![
                PaymentSource::Credit,
                PaymentSource::Paypal,
                PaymentSource::Escrow,
            ],
            ..Default::default()
        };

        let chain = registry.chain_for(&customer);
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].source(), PaymentSource::Escrow);
    }
}
