//! Credit ledger
//!
//! Selection is pure (`plan_credit_application`), application is a
//! transaction-scoped write. Credits are consumed soonest-expiring-first and
//! the writes are immediate: a credit applied against an invoice that later
//! fails to fully settle stays applied, and the invoice carries the reduced
//! remaining balance into its next payment attempt.

use chrono::{DateTime, Utc};
use stratus_core::models::{CustomerCredit, InvoicePayment, PaymentSource};
use stratus_core::traits::Clock;
use stratus_core::AppResult;
use stratus_db::repositories::{credit_repo, invoice_repo};
use stratus_db::LockedCustomer;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// One credit consumed during an application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedCredit {
    pub credit_id: Uuid,
    pub applied_usd_cents: i64,
    pub remaining_after_usd_cents: i64,
}

/// Result of applying credits against an amount due
#[derive(Debug, Clone, Default)]
pub struct CreditApplication {
    pub applied: Vec<AppliedCredit>,
    pub total_applied_cents: i64,
    pub remaining_invoice_cents: i64,
}

/// Decide which credits cover `amount_due_cents`, in the order given.
///
/// Each credit is consumed fully before the next is touched; the final one
/// is consumed partially if it exceeds what is still due. Callers pass
/// credits already ordered soonest-expiring-first.
pub fn plan_credit_application(
    credits: &[CustomerCredit],
    amount_due_cents: i64,
) -> CreditApplication {
    let mut applied = Vec::new();
    let mut due = amount_due_cents.max(0);

    for credit in credits {
        if due == 0 {
            break;
        }
        let take = due.min(credit.remaining_amount_usd_cents);
        if take <= 0 {
            continue;
        }
        applied.push(AppliedCredit {
            credit_id: credit.id,
            applied_usd_cents: take,
            remaining_after_usd_cents: credit.remaining_amount_usd_cents - take,
        });
        due -= take;
    }

    CreditApplication {
        total_applied_cents: amount_due_cents.max(0) - due,
        remaining_invoice_cents: due,
        applied,
    }
}

/// Apply active credits to an invoice, oldest-expiring first.
///
/// Writes are immediate: each consumed credit's remainder is persisted and
/// a `credit`-sourced `InvoicePayment` row is recorded. Nothing here is
/// compensated if a later provider step fails.
#[instrument(skip(session, clock))]
pub async fn apply_credits_to_invoice(
    session: &mut LockedCustomer,
    customer_id: i64,
    invoice_id: Uuid,
    amount_due_cents: i64,
    clock: &dyn Clock,
) -> AppResult<CreditApplication> {
    if amount_due_cents <= 0 {
        return Ok(CreditApplication {
            remaining_invoice_cents: 0,
            ..Default::default()
        });
    }

    let credits =
        credit_repo::list_active_for_update(session.conn(), customer_id, clock.now()).await?;
    let application = plan_credit_application(&credits, amount_due_cents);

    for entry in &application.applied {
        credit_repo::set_remaining(
            session.conn(),
            entry.credit_id,
            entry.remaining_after_usd_cents,
        )
        .await?;

        let payment = InvoicePayment::new(
            invoice_id,
            PaymentSource::Credit,
            entry.applied_usd_cents,
            entry.credit_id.to_string(),
        );
        invoice_repo::insert_payment(session.conn(), &payment).await?;

        debug!(
            "Applied credit {} for {} cents to invoice {}",
            entry.credit_id, entry.applied_usd_cents, invoice_id
        );
    }

    if application.total_applied_cents > 0 {
        info!(
            customer_id,
            %invoice_id,
            applied_cents = application.total_applied_cents,
            remaining_cents = application.remaining_invoice_cents,
            "Credits applied to invoice"
        );
    }

    Ok(application)
}

/// Grant a credit to a customer
#[instrument(skip(session))]
pub async fn grant_credit(
    session: &mut LockedCustomer,
    customer_id: i64,
    amount_usd_cents: i64,
    expires_at: Option<DateTime<Utc>>,
    reason: &str,
) -> AppResult<CustomerCredit> {
    let credit = CustomerCredit {
        id: Uuid::new_v4(),
        customer_id,
        original_amount_usd_cents: amount_usd_cents,
        remaining_amount_usd_cents: amount_usd_cents,
        expires_at,
        reason: reason.to_string(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    credit_repo::insert(session.conn(), &credit).await?;

    info!(
        customer_id,
        amount_usd_cents, reason, "Granted customer credit"
    );

    Ok(credit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn credit(remaining: i64, expires_in_days: Option<i64>) -> CustomerCredit {
        let now = Utc::now();
        CustomerCredit {
            id: Uuid::new_v4(),
            customer_id: 1,
            original_amount_usd_cents: remaining,
            remaining_amount_usd_cents: remaining,
            expires_at: expires_in_days.map(|d| now + Duration::days(d)),
            reason: "test".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_single_credit_partial_consumption() {
        // $50 credit against a $200 invoice: all of it applies, $150 remains.
        let credits = vec![credit(5_000, None)];
        let plan = plan_credit_application(&credits, 20_000);

        assert_eq!(plan.total_applied_cents, 5_000);
        assert_eq!(plan.remaining_invoice_cents, 15_000);
        assert_eq!(plan.applied.len(), 1);
        assert_eq!(plan.applied[0].remaining_after_usd_cents, 0);
    }

    #[test]
    fn test_credit_exceeding_due_keeps_remainder() {
        let credits = vec![credit(10_000, None)];
        let plan = plan_credit_application(&credits, 3_000);

        assert_eq!(plan.total_applied_cents, 3_000);
        assert_eq!(plan.remaining_invoice_cents, 0);
        assert_eq!(plan.applied[0].applied_usd_cents, 3_000);
        assert_eq!(plan.applied[0].remaining_after_usd_cents, 7_000);
    }

    #[test]
    fn test_each_credit_fully_consumed_before_next() {
        let first = credit(2_000, Some(5));
        let second = credit(4_000, Some(30));
        let credits = vec![first.clone(), second.clone()];

        let plan = plan_credit_application(&credits, 5_000);

        assert_eq!(plan.applied.len(), 2);
        assert_eq!(plan.applied[0].credit_id, first.id);
        assert_eq!(plan.applied[0].applied_usd_cents, 2_000);
        assert_eq!(plan.applied[1].credit_id, second.id);
        assert_eq!(plan.applied[1].applied_usd_cents, 3_000);
        assert_eq!(plan.applied[1].remaining_after_usd_cents, 1_000);
        assert_eq!(plan.remaining_invoice_cents, 0);
    }

    #[test]
    fn test_untouched_credits_not_listed() {
        let credits = vec![credit(10_000, Some(5)), credit(10_000, Some(30))];
        let plan = plan_credit_application(&credits, 500);

        assert_eq!(plan.applied.len(), 1);
        assert_eq!(plan.remaining_invoice_cents, 0);
    }

    #[test]
    fn test_nothing_due() {
        let credits = vec![credit(10_000, None)];
        let plan = plan_credit_application(&credits, 0);
        assert!(plan.applied.is_empty());
        assert_eq!(plan.total_applied_cents, 0);
    }
}
