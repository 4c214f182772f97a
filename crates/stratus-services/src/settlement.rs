//! Invoice settlement
//!
//! Orchestrates one payment attempt: credits first, then the customer's
//! provider chain in priority order. Business failures become invoice state
//! (`failed` + `failure_reason`), never errors; only programmer errors
//! (invoice not found) and the requires-authentication precondition
//! propagate as `Err`.

use stratus_core::models::{
    cents_to_dollars, Customer, EscrowTransaction, InvoicePayment, PaymentSource,
};
use stratus_core::traits::Clock;
use stratus_core::{AppError, AppResult};
use stratus_db::repositories::{customer_repo, escrow_repo, invoice_repo};
use stratus_db::LockedCustomer;
use stratus_providers::{ChargeOutcome, ChargeRequest, PaymentProvider, ProviderRegistry};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::credits;

/// One settled slice of an invoice, from one source
#[derive(Debug, Clone)]
pub struct SourcePayment {
    pub source: PaymentSource,
    pub amount_usd_cents: i64,
    pub reference_id: String,
}

/// Terminal state of one settlement attempt
#[derive(Debug, Clone)]
pub enum SettlementOutcome {
    Paid,
    Failed {
        reason: String,
        retryable: bool,
        action_url: Option<String>,
    },
}

impl SettlementOutcome {
    pub fn is_paid(&self) -> bool {
        matches!(self, SettlementOutcome::Paid)
    }
}

/// Result of `process_invoice_payment`
#[derive(Debug, Clone)]
pub struct SettlementResult {
    pub invoice_id: Uuid,
    /// Amount still owed when the attempt started
    pub initial_due_cents: i64,
    /// Total paid across all attempts after this one
    pub paid_cents: i64,
    /// Per-source breakdown of what this attempt settled
    pub payments: Vec<SourcePayment>,
    pub outcome: SettlementOutcome,
}

/// Winning provider of a chain run
#[derive(Debug, Clone)]
pub struct ChainWinner {
    pub source: PaymentSource,
    pub reference_id: String,
    pub tx_digest: Option<String>,
}

/// Outcome of walking the provider chain (no ledger writes)
#[derive(Debug, Clone, Default)]
pub struct ChainRun {
    pub winner: Option<ChainWinner>,
    /// Hosted authentication URL surfaced by a failed provider; persisted on
    /// the invoice so the customer can complete the flow
    pub pending_action_url: Option<String>,
    /// Message and retryability of the last provider failure
    pub last_error: Option<(String, bool)>,
    /// Sources skipped because they reported they could not pay
    pub skipped: Vec<PaymentSource>,
}

/// Try each provider in order until one succeeds.
///
/// Providers that report `can_pay == false` are skipped without a charge
/// attempt. The walk stops at the first success; later providers are never
/// consulted.
pub async fn run_provider_chain(
    providers: &[&dyn PaymentProvider],
    customer: &Customer,
    request: &ChargeRequest,
) -> ChainRun {
    let mut run = ChainRun::default();

    for provider in providers {
        let source = provider.source();

        if !provider.is_configured(customer) || !provider.can_pay(customer, request.amount_usd_cents)
        {
            debug!(
                customer_id = customer.id,
                %source,
                amount_cents = request.amount_usd_cents,
                "Provider cannot pay, skipping"
            );
            run.skipped.push(source);
            continue;
        }

        match provider.charge(customer, request).await {
            ChargeOutcome::Success {
                reference_id,
                tx_digest,
            } => {
                run.winner = Some(ChainWinner {
                    source,
                    reference_id,
                    tx_digest,
                });
                return run;
            }
            ChargeOutcome::Failure {
                error,
                retryable,
                hosted_action_url,
                ..
            } => {
                warn!(
                    customer_id = customer.id,
                    %source,
                    retryable,
                    "Provider charge failed: {}",
                    error
                );
                if hosted_action_url.is_some() {
                    run.pending_action_url = hosted_action_url;
                }
                run.last_error = Some((error, retryable));
            }
        }
    }

    run
}

/// Settle an invoice: credits, then the provider chain.
///
/// Returns `Err` only for programmer errors (unknown invoice) or when the
/// invoice awaits out-of-band authentication; every provider-level failure
/// is reported through the returned `SettlementOutcome`.
#[instrument(skip(session, registry, clock))]
pub async fn process_invoice_payment(
    session: &mut LockedCustomer,
    invoice_id: Uuid,
    registry: &ProviderRegistry,
    clock: &dyn Clock,
) -> AppResult<SettlementResult> {
    let invoice = invoice_repo::find_by_id(session.conn(), invoice_id)
        .await?
        .ok_or_else(|| AppError::InvoiceNotFound(invoice_id.to_string()))?;

    // A charge the customer has not authenticated must not be silently
    // re-attempted server-side.
    if invoice.awaits_authentication() {
        let action_url = invoice.payment_action_url.clone().unwrap_or_default();
        return Err(AppError::RequiresAuthentication { action_url });
    }

    // Idempotent re-run: a paid invoice settles to itself.
    if invoice.is_settled() {
        return Ok(SettlementResult {
            invoice_id,
            initial_due_cents: 0,
            paid_cents: invoice.amount_paid_usd_cents,
            payments: Vec::new(),
            outcome: SettlementOutcome::Paid,
        });
    }

    let customer = customer_repo::get_for_update(session.conn(), invoice.customer_id).await?;

    let initial_due = invoice.remaining_due_cents();
    let mut paid_total = invoice.amount_paid_usd_cents;
    let mut payments = Vec::new();

    if initial_due == 0 {
        invoice_repo::mark_paid(session.conn(), invoice_id, paid_total, None).await?;
        return Ok(SettlementResult {
            invoice_id,
            initial_due_cents: 0,
            paid_cents: paid_total,
            payments,
            outcome: SettlementOutcome::Paid,
        });
    }

    // Credits first. These writes stick even if every provider then fails.
    let application =
        credits::apply_credits_to_invoice(session, customer.id, invoice_id, initial_due, clock)
            .await?;
    for entry in &application.applied {
        payments.push(SourcePayment {
            source: PaymentSource::Credit,
            amount_usd_cents: entry.applied_usd_cents,
            reference_id: entry.credit_id.to_string(),
        });
    }
    paid_total += application.total_applied_cents;

    let remaining = application.remaining_invoice_cents;
    if remaining == 0 {
        invoice_repo::mark_paid(session.conn(), invoice_id, paid_total, None).await?;
        info!(%invoice_id, paid_total, "Invoice fully settled from credits");
        return Ok(SettlementResult {
            invoice_id,
            initial_due_cents: initial_due,
            paid_cents: paid_total,
            payments,
            outcome: SettlementOutcome::Paid,
        });
    }

    let request = ChargeRequest {
        billing_record_id: invoice_id,
        amount_usd_cents: remaining,
        description: format!(
            "Stratus invoice {} ({} - {})",
            invoice_id, invoice.billing_period_start, invoice.billing_period_end
        ),
    };

    let chain = registry.chain_for(&customer);
    let run = run_provider_chain(&chain, &customer, &request).await;

    match run.winner {
        Some(winner) => {
            if winner.source == PaymentSource::Escrow {
                // Mirror the on-chain charge (in dollars) before the payment
                // row, and debit the mirrored balance.
                let mirror = EscrowTransaction::charge(
                    customer.id,
                    cents_to_dollars(remaining),
                    winner.reference_id.clone(),
                    invoice_id,
                );
                escrow_repo::insert(session.conn(), &mirror).await?;
                customer_repo::adjust_balance(session.conn(), customer.id, -remaining).await?;
            }

            let payment = InvoicePayment::new(
                invoice_id,
                winner.source,
                remaining,
                winner.reference_id.clone(),
            );
            invoice_repo::insert_payment(session.conn(), &payment).await?;

            paid_total += remaining;
            // mark_paid also clears any stale payment_action_url left by an
            // earlier provider in this attempt, so the customer cannot
            // complete an abandoned authentication flow and be double
            // charged.
            invoice_repo::mark_paid(
                session.conn(),
                invoice_id,
                paid_total,
                winner.tx_digest.as_deref(),
            )
            .await?;

            payments.push(SourcePayment {
                source: winner.source,
                amount_usd_cents: remaining,
                reference_id: winner.reference_id,
            });

            info!(
                %invoice_id,
                source = %winner.source,
                paid_total,
                "Invoice settled"
            );

            Ok(SettlementResult {
                invoice_id,
                initial_due_cents: initial_due,
                paid_cents: paid_total,
                payments,
                outcome: SettlementOutcome::Paid,
            })
        }
        None => {
            let (reason, retryable) = run.last_error.unwrap_or_else(|| {
                (
                    format!(
                        "no payment provider could cover {} cents (skipped: {})",
                        remaining,
                        run.skipped
                            .iter()
                            .map(ToString::to_string)
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                    true,
                )
            });

            invoice_repo::mark_failed(
                session.conn(),
                invoice_id,
                paid_total,
                &reason,
                run.pending_action_url.as_deref(),
                retryable,
            )
            .await?;

            warn!(%invoice_id, retryable, "Invoice settlement failed: {}", reason);

            Ok(SettlementResult {
                invoice_id,
                initial_due_cents: initial_due,
                paid_cents: paid_total,
                payments,
                outcome: SettlementOutcome::Failed {
                    reason,
                    retryable,
                    action_url: run.pending_action_url,
                },
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use stratus_providers::{ProviderErrorCode, ProviderInfo};

    /// Provider with scripted eligibility and outcome
    struct ScriptedProvider {
        source: PaymentSource,
        eligible: bool,
        outcome: ChargeOutcome,
    }

    #[async_trait]
    impl PaymentProvider for ScriptedProvider {
        fn source(&self) -> PaymentSource {
            self.source
        }

        fn is_configured(&self, _customer: &Customer) -> bool {
            true
        }

        fn can_pay(&self, _customer: &Customer, _amount_cents: i64) -> bool {
            self.eligible
        }

        async fn charge(&self, _customer: &Customer, _request: &ChargeRequest) -> ChargeOutcome {
            self.outcome.clone()
        }

        fn get_info(&self, _customer: &Customer) -> Option<ProviderInfo> {
            None
        }
    }

    fn success(source: PaymentSource, reference: &str) -> ScriptedProvider {
        ScriptedProvider {
            source,
            eligible: true,
            outcome: ChargeOutcome::Success {
                reference_id: reference.to_string(),
                tx_digest: (source == PaymentSource::Escrow).then(|| reference.to_string()),
            },
        }
    }

    fn ineligible(source: PaymentSource) -> ScriptedProvider {
        ScriptedProvider {
            source,
            eligible: false,
            outcome: ChargeOutcome::Failure {
                error: "unreachable".to_string(),
                code: ProviderErrorCode::ProcessingError,
                retryable: true,
                hosted_action_url: None,
            },
        }
    }

    fn failing(source: PaymentSource, error: &str, retryable: bool) -> ScriptedProvider {
        ScriptedProvider {
            source,
            eligible: true,
            outcome: ChargeOutcome::Failure {
                error: error.to_string(),
                code: ProviderErrorCode::ProcessingError,
                retryable,
                hosted_action_url: None,
            },
        }
    }

    fn requires_action(source: PaymentSource, url: &str) -> ScriptedProvider {
        ScriptedProvider {
            source,
            eligible: true,
            outcome: ChargeOutcome::Failure {
                error: "payment requires customer authentication".to_string(),
                code: ProviderErrorCode::RequiresAction,
                retryable: false,
                hosted_action_url: Some(url.to_string()),
            },
        }
    }

    fn request() -> ChargeRequest {
        ChargeRequest {
            billing_record_id: Uuid::new_v4(),
            amount_usd_cents: 900,
            description: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_first_eligible_provider_wins() {
        let escrow = success(PaymentSource::Escrow, "0xdigest");
        let stripe = success(PaymentSource::Stripe, "ch_1");
        let providers: Vec<&dyn PaymentProvider> = vec![&escrow, &stripe];

        let run = run_provider_chain(&providers, &Customer::default(), &request()).await;

        let winner = run.winner.expect("chain should settle");
        assert_eq!(winner.source, PaymentSource::Escrow);
        assert_eq!(winner.tx_digest.as_deref(), Some("0xdigest"));
    }

    #[tokio::test]
    async fn test_ineligible_provider_is_skipped_not_charged() {
        // Escrow cannot cover the amount; the card at priority 2 pays the
        // full remainder.
        let escrow = ineligible(PaymentSource::Escrow);
        let stripe = success(PaymentSource::Stripe, "ch_2");
        let providers: Vec<&dyn PaymentProvider> = vec![&escrow, &stripe];

        let run = run_provider_chain(&providers, &Customer::default(), &request()).await;

        let winner = run.winner.expect("stripe should settle");
        assert_eq!(winner.source, PaymentSource::Stripe);
        assert_eq!(run.skipped, vec![PaymentSource::Escrow]);
        assert!(run.last_error.is_none());
    }

    #[tokio::test]
    async fn test_failure_falls_through_to_next_provider() {
        let escrow = failing(PaymentSource::Escrow, "rpc unavailable", true);
        let stripe = success(PaymentSource::Stripe, "ch_3");
        let providers: Vec<&dyn PaymentProvider> = vec![&escrow, &stripe];

        let run = run_provider_chain(&providers, &Customer::default(), &request()).await;

        assert_eq!(run.winner.unwrap().source, PaymentSource::Stripe);
        // The earlier failure is remembered even though settlement succeeded.
        assert!(run.last_error.is_some());
    }

    #[tokio::test]
    async fn test_all_failures_propagate_last_error_retryability() {
        let escrow = failing(PaymentSource::Escrow, "rpc unavailable", true);
        let stripe = failing(PaymentSource::Stripe, "card declined: insufficient_funds", false);
        let providers: Vec<&dyn PaymentProvider> = vec![&escrow, &stripe];

        let run = run_provider_chain(&providers, &Customer::default(), &request()).await;

        assert!(run.winner.is_none());
        let (reason, retryable) = run.last_error.unwrap();
        assert!(reason.contains("declined"));
        assert!(!retryable);
    }

    #[tokio::test]
    async fn test_action_url_survives_later_provider_failure() {
        let stripe = requires_action(PaymentSource::Stripe, "https://pay.example/3ds/ch_9");
        let paypal = failing(PaymentSource::Paypal, "not available", false);
        let providers: Vec<&dyn PaymentProvider> = vec![&stripe, &paypal];

        let run = run_provider_chain(&providers, &Customer::default(), &request()).await;

        assert!(run.winner.is_none());
        assert_eq!(
            run.pending_action_url.as_deref(),
            Some("https://pay.example/3ds/ch_9")
        );
        // Last error is paypal's, but the action URL is preserved.
        let (reason, _) = run.last_error.unwrap();
        assert!(reason.contains("not available"));
    }

    #[tokio::test]
    async fn test_empty_chain_produces_no_winner() {
        let providers: Vec<&dyn PaymentProvider> = vec![];
        let run = run_provider_chain(&providers, &Customer::default(), &request()).await;
        assert!(run.winner.is_none());
        assert!(run.last_error.is_none());
    }
}
