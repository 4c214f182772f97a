//! PayPal payment provider (stub)
//!
//! Registered so the provider chain and payment-methods API know the
//! variant exists, but it reports unconfigured for every customer until the
//! integration lands.

use async_trait::async_trait;
use stratus_core::models::{Customer, PaymentSource};

use crate::{ChargeOutcome, ChargeRequest, PaymentProvider, ProviderErrorCode, ProviderInfo};

/// Placeholder PayPal provider
#[derive(Debug, Default)]
pub struct PaypalProvider;

impl PaypalProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PaymentProvider for PaypalProvider {
    fn source(&self) -> PaymentSource {
        PaymentSource::Paypal
    }

    fn is_configured(&self, _customer: &Customer) -> bool {
        false
    }

    fn can_pay(&self, _customer: &Customer, _amount_cents: i64) -> bool {
        false
    }

    async fn charge(&self, _customer: &Customer, _request: &ChargeRequest) -> ChargeOutcome {
        ChargeOutcome::Failure {
            error: "paypal is not available yet".to_string(),
            code: ProviderErrorCode::NotConfigured,
            retryable: false,
            hosted_action_url: None,
        }
    }

    fn get_info(&self, _customer: &Customer) -> Option<ProviderInfo> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_paypal_never_eligible() {
        let provider = PaypalProvider::new();
        let customer = Customer::default();

        assert!(!provider.is_configured(&customer));
        assert!(!provider.can_pay(&customer, 1));

        let outcome = provider
            .charge(
                &customer,
                &ChargeRequest {
                    billing_record_id: uuid::Uuid::new_v4(),
                    amount_usd_cents: 100,
                    description: "test".to_string(),
                },
            )
            .await;
        assert!(!outcome.is_success());
    }
}
