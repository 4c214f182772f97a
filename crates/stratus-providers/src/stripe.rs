//! Card payment provider
//!
//! Wraps the card processor behind `CardGateway` (the concrete HTTP client
//! lives outside the billing engine). Declines are terminal; a charge that
//! requires step-up authentication surfaces the hosted payment URL so the
//! dashboard can redirect the customer.

use async_trait::async_trait;
use std::sync::Arc;
use stratus_core::models::{Customer, PaymentSource};
use tracing::{debug, instrument, warn};

use crate::{ChargeOutcome, ChargeRequest, PaymentProvider, ProviderErrorCode, ProviderInfo};

/// Status of a gateway charge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayChargeStatus {
    Succeeded,
    Declined,
    RequiresAction,
}

/// A charge created at the gateway
#[derive(Debug, Clone)]
pub struct GatewayCharge {
    pub charge_id: String,
    pub status: GatewayChargeStatus,
    /// Hosted page for completing 3-D Secure, when status is RequiresAction
    pub hosted_invoice_url: Option<String>,
    /// Processor decline reason, when status is Declined
    pub decline_reason: Option<String>,
}

/// Gateway transport or processing failure
#[derive(Debug, Clone)]
pub struct GatewayError {
    pub message: String,
    pub retryable: bool,
}

/// Card processor surface consumed by the provider
#[async_trait]
pub trait CardGateway: Send + Sync {
    /// Charge an attached payment method
    async fn charge(
        &self,
        gateway_customer_id: &str,
        payment_method_id: &str,
        amount_usd_cents: i64,
        description: &str,
    ) -> Result<GatewayCharge, GatewayError>;

    /// Create a gateway-side customer for a wallet
    async fn create_customer(&self, wallet_address: &str) -> Result<String, GatewayError>;
}

/// Card payment provider
pub struct CardProvider<G: CardGateway> {
    gateway: Arc<G>,
}

impl<G: CardGateway> CardProvider<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        Self { gateway }
    }

    /// Gateway access for the payment-methods API (customer creation)
    pub fn gateway(&self) -> &G {
        &self.gateway
    }
}

#[async_trait]
impl<G: CardGateway> PaymentProvider for CardProvider<G> {
    fn source(&self) -> PaymentSource {
        PaymentSource::Stripe
    }

    fn is_configured(&self, customer: &Customer) -> bool {
        customer.stripe_customer_id.is_some() && customer.card_payment_method_id.is_some()
    }

    fn can_pay(&self, customer: &Customer, _amount_cents: i64) -> bool {
        self.is_configured(customer) && customer.has_active_card()
    }

    #[instrument(skip(self, customer, request), fields(customer_id = customer.id))]
    async fn charge(&self, customer: &Customer, request: &ChargeRequest) -> ChargeOutcome {
        let (Some(gateway_customer_id), Some(payment_method_id)) = (
            customer.stripe_customer_id.as_deref(),
            customer.card_payment_method_id.as_deref(),
        ) else {
            return ChargeOutcome::Failure {
                error: "no card payment method configured".to_string(),
                code: ProviderErrorCode::NotConfigured,
                retryable: false,
                hosted_action_url: None,
            };
        };

        debug!(
            "Charging card for {} cents (record {})",
            request.amount_usd_cents, request.billing_record_id
        );

        let charge = self
            .gateway
            .charge(
                gateway_customer_id,
                payment_method_id,
                request.amount_usd_cents,
                &request.description,
            )
            .await;

        match charge {
            Ok(charge) => match charge.status {
                GatewayChargeStatus::Succeeded => ChargeOutcome::Success {
                    reference_id: charge.charge_id,
                    tx_digest: None,
                },
                GatewayChargeStatus::Declined => {
                    let reason = charge
                        .decline_reason
                        .unwrap_or_else(|| "card declined".to_string());
                    warn!("Card charge declined: {}", reason);
                    ChargeOutcome::Failure {
                        error: format!("card declined: {}", reason),
                        code: ProviderErrorCode::CardDeclined,
                        retryable: false,
                        hosted_action_url: None,
                    }
                }
                GatewayChargeStatus::RequiresAction => {
                    warn!("Card charge requires customer authentication");
                    ChargeOutcome::Failure {
                        error: "payment requires customer authentication".to_string(),
                        code: ProviderErrorCode::RequiresAction,
                        retryable: false,
                        hosted_action_url: charge.hosted_invoice_url,
                    }
                }
            },
            Err(e) => {
                warn!("Card gateway error: {}", e.message);
                ChargeOutcome::Failure {
                    error: format!("card processing error: {}", e.message),
                    code: ProviderErrorCode::ProcessingError,
                    retryable: e.retryable,
                    hosted_action_url: None,
                }
            }
        }
    }

    fn get_info(&self, customer: &Customer) -> Option<ProviderInfo> {
        if !self.is_configured(customer) {
            return None;
        }
        Some(ProviderInfo {
            source: PaymentSource::Stripe,
            label: "Card".to_string(),
            detail: customer.card_payment_method_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    /// Scriptable gateway for exercising each charge path
    pub struct ScriptedGateway {
        pub outcome: GatewayChargeStatus,
        pub hosted_url: Option<String>,
    }

    #[async_trait]
    impl CardGateway for ScriptedGateway {
        async fn charge(
            &self,
            _gateway_customer_id: &str,
            _payment_method_id: &str,
            _amount_usd_cents: i64,
            _description: &str,
        ) -> Result<GatewayCharge, GatewayError> {
            Ok(GatewayCharge {
                charge_id: "ch_test_1".to_string(),
                status: self.outcome,
                hosted_invoice_url: self.hosted_url.clone(),
                decline_reason: matches!(self.outcome, GatewayChargeStatus::Declined)
                    .then(|| "insufficient_funds".to_string()),
            })
        }

        async fn create_customer(&self, _wallet_address: &str) -> Result<String, GatewayError> {
            Ok("cus_test_1".to_string())
        }
    }

    fn carded_customer() -> Customer {
        Customer {
            id: 1,
            stripe_customer_id: Some("cus_1".to_string()),
            card_payment_method_id: Some("pm_1".to_string()),
            card_active: true,
            ..Default::default()
        }
    }

    fn request() -> ChargeRequest {
        ChargeRequest {
            billing_record_id: Uuid::new_v4(),
            amount_usd_cents: 2_900,
            description: "pro plan".to_string(),
        }
    }

    #[test]
    fn test_can_pay_needs_active_card() {
        let provider = CardProvider::new(Arc::new(ScriptedGateway {
            outcome: GatewayChargeStatus::Succeeded,
            hosted_url: None,
        }));

        assert!(provider.can_pay(&carded_customer(), 1));

        let mut inactive = carded_customer();
        inactive.card_active = false;
        assert!(!provider.can_pay(&inactive, 1));

        assert!(!provider.can_pay(&Customer::default(), 1));
    }

    #[tokio::test]
    async fn test_decline_is_not_retryable() {
        let provider = CardProvider::new(Arc::new(ScriptedGateway {
            outcome: GatewayChargeStatus::Declined,
            hosted_url: None,
        }));

        match provider.charge(&carded_customer(), &request()).await {
            ChargeOutcome::Failure {
                error,
                code,
                retryable,
                ..
            } => {
                assert_eq!(code, ProviderErrorCode::CardDeclined);
                assert!(!retryable);
                assert!(error.contains("declined"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_requires_action_carries_hosted_url() {
        let provider = CardProvider::new(Arc::new(ScriptedGateway {
            outcome: GatewayChargeStatus::RequiresAction,
            hosted_url: Some("https://pay.example/3ds/ch_test_1".to_string()),
        }));

        match provider.charge(&carded_customer(), &request()).await {
            ChargeOutcome::Failure {
                code,
                hosted_action_url,
                retryable,
                ..
            } => {
                assert_eq!(code, ProviderErrorCode::RequiresAction);
                assert!(!retryable);
                assert_eq!(
                    hosted_action_url.as_deref(),
                    Some("https://pay.example/3ds/ch_test_1")
                );
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }
}
