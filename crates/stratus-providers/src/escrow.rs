//! On-chain escrow payment provider
//!
//! Wraps an opaque chain client behind `EscrowBackend`. Eligibility is
//! decided from the customer's mirrored balance (kept in sync under the
//! customer lock), never by querying the chain on the hot path. The chain's
//! native unit is decimal dollars; conversion happens only at this seam.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use stratus_core::models::{cents_to_dollars, Customer, PaymentSource};
use tracing::{debug, instrument, warn};

use crate::{ChargeOutcome, ChargeRequest, PaymentProvider, ProviderErrorCode, ProviderInfo};

/// Receipt for a submitted chain transaction
#[derive(Debug, Clone)]
pub struct ChainReceipt {
    pub tx_digest: String,
}

/// On-chain escrow account state
#[derive(Debug, Clone)]
pub struct ChainAccount {
    pub balance_usd: Decimal,
    pub owner: String,
}

/// Chain client failure
#[derive(Debug, Clone)]
pub struct ChainError {
    pub message: String,
    pub retryable: bool,
}

/// Opaque escrow contract surface: charge, deposit, withdraw, read
#[async_trait]
pub trait EscrowBackend: Send + Sync {
    async fn charge(
        &self,
        escrow_object_id: &str,
        amount_usd: Decimal,
    ) -> Result<ChainReceipt, ChainError>;

    async fn deposit(
        &self,
        escrow_object_id: &str,
        amount_usd: Decimal,
    ) -> Result<ChainReceipt, ChainError>;

    async fn withdraw(
        &self,
        escrow_object_id: &str,
        amount_usd: Decimal,
    ) -> Result<ChainReceipt, ChainError>;

    async fn get_account(&self, escrow_object_id: &str) -> Result<ChainAccount, ChainError>;
}

/// Escrow payment provider
pub struct EscrowProvider<B: EscrowBackend> {
    backend: Arc<B>,
}

impl<B: EscrowBackend> EscrowProvider<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Direct access to the chain surface for deposit/withdraw mirroring
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

#[async_trait]
impl<B: EscrowBackend> PaymentProvider for EscrowProvider<B> {
    fn source(&self) -> PaymentSource {
        PaymentSource::Escrow
    }

    fn is_configured(&self, customer: &Customer) -> bool {
        customer.escrow_object_id.is_some()
    }

    fn can_pay(&self, customer: &Customer, amount_cents: i64) -> bool {
        self.is_configured(customer)
            && customer.escrow_covers(amount_cents)
            && customer.within_spending_limit(amount_cents)
    }

    #[instrument(skip(self, customer, request), fields(customer_id = customer.id))]
    async fn charge(&self, customer: &Customer, request: &ChargeRequest) -> ChargeOutcome {
        let Some(escrow_object_id) = customer.escrow_object_id.as_deref() else {
            return ChargeOutcome::Failure {
                error: "no escrow account configured".to_string(),
                code: ProviderErrorCode::NotConfigured,
                retryable: false,
                hosted_action_url: None,
            };
        };

        if !customer.within_spending_limit(request.amount_usd_cents) {
            return ChargeOutcome::Failure {
                error: format!(
                    "charge of {} cents exceeds spending limit of {} cents",
                    request.amount_usd_cents, customer.spending_limit_usd_cents
                ),
                code: ProviderErrorCode::SpendingLimitExceeded,
                retryable: false,
                hosted_action_url: None,
            };
        }

        if !customer.escrow_covers(request.amount_usd_cents) {
            return ChargeOutcome::Failure {
                error: format!(
                    "escrow balance {} cents below charge of {} cents",
                    customer.balance_usd_cents, request.amount_usd_cents
                ),
                code: ProviderErrorCode::InsufficientFunds,
                retryable: false,
                hosted_action_url: None,
            };
        }

        let amount_usd = cents_to_dollars(request.amount_usd_cents);
        debug!(
            "Charging escrow {} for ${} (record {})",
            escrow_object_id, amount_usd, request.billing_record_id
        );

        match self.backend.charge(escrow_object_id, amount_usd).await {
            Ok(receipt) => ChargeOutcome::Success {
                reference_id: receipt.tx_digest.clone(),
                tx_digest: Some(receipt.tx_digest),
            },
            Err(e) => {
                warn!("Escrow charge failed: {}", e.message);
                ChargeOutcome::Failure {
                    error: format!("escrow charge failed: {}", e.message),
                    code: ProviderErrorCode::ProcessingError,
                    retryable: e.retryable,
                    hosted_action_url: None,
                }
            }
        }
    }

    fn get_info(&self, customer: &Customer) -> Option<ProviderInfo> {
        customer.escrow_object_id.as_ref().map(|id| ProviderInfo {
            source: PaymentSource::Escrow,
            label: "On-chain escrow".to_string(),
            detail: Some(id.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    struct StubBackend {
        fail: bool,
    }

    #[async_trait]
    impl EscrowBackend for StubBackend {
        async fn charge(
            &self,
            _escrow_object_id: &str,
            _amount_usd: Decimal,
        ) -> Result<ChainReceipt, ChainError> {
            if self.fail {
                Err(ChainError {
                    message: "rpc unavailable".to_string(),
                    retryable: true,
                })
            } else {
                Ok(ChainReceipt {
                    tx_digest: "0xabc123".to_string(),
                })
            }
        }

        async fn deposit(
            &self,
            _escrow_object_id: &str,
            _amount_usd: Decimal,
        ) -> Result<ChainReceipt, ChainError> {
            unimplemented!()
        }

        async fn withdraw(
            &self,
            _escrow_object_id: &str,
            _amount_usd: Decimal,
        ) -> Result<ChainReceipt, ChainError> {
            unimplemented!()
        }

        async fn get_account(&self, _escrow_object_id: &str) -> Result<ChainAccount, ChainError> {
            Ok(ChainAccount {
                balance_usd: dec!(100.00),
                owner: "0xowner".to_string(),
            })
        }
    }

    fn customer(balance_cents: i64, limit_cents: i64) -> Customer {
        Customer {
            id: 1,
            escrow_object_id: Some("0xescrow".to_string()),
            balance_usd_cents: balance_cents,
            spending_limit_usd_cents: limit_cents,
            ..Default::default()
        }
    }

    fn request(amount_cents: i64) -> ChargeRequest {
        ChargeRequest {
            billing_record_id: Uuid::new_v4(),
            amount_usd_cents: amount_cents,
            description: "test".to_string(),
        }
    }

    #[test]
    fn test_can_pay_requires_balance_and_limit() {
        let provider = EscrowProvider::new(Arc::new(StubBackend { fail: false }));

        assert!(provider.can_pay(&customer(10_000, 0), 10_000));
        assert!(!provider.can_pay(&customer(9_999, 0), 10_000));
        assert!(!provider.can_pay(&customer(50_000, 5_000), 10_000));

        let unconfigured = Customer {
            escrow_object_id: None,
            balance_usd_cents: 50_000,
            ..Default::default()
        };
        assert!(!provider.can_pay(&unconfigured, 100));
    }

    #[tokio::test]
    async fn test_charge_success_carries_digest() {
        let provider = EscrowProvider::new(Arc::new(StubBackend { fail: false }));

        let outcome = provider.charge(&customer(20_000, 0), &request(15_000)).await;
        match outcome {
            ChargeOutcome::Success {
                reference_id,
                tx_digest,
            } => {
                assert_eq!(reference_id, "0xabc123");
                assert_eq!(tx_digest.as_deref(), Some("0xabc123"));
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_chain_failure_is_retryable() {
        let provider = EscrowProvider::new(Arc::new(StubBackend { fail: true }));

        let outcome = provider.charge(&customer(20_000, 0), &request(15_000)).await;
        match outcome {
            ChargeOutcome::Failure {
                code, retryable, ..
            } => {
                assert_eq!(code, ProviderErrorCode::ProcessingError);
                assert!(retryable);
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_spending_limit_blocks_charge() {
        let provider = EscrowProvider::new(Arc::new(StubBackend { fail: false }));

        let outcome = provider.charge(&customer(50_000, 5_000), &request(10_000)).await;
        match outcome {
            ChargeOutcome::Failure { code, .. } => {
                assert_eq!(code, ProviderErrorCode::SpendingLimitExceeded);
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }
}
