//! Invoice engine
//!
//! Owns the DRAFT lifecycle: the single forward-looking billing record per
//! customer, its subscription-line upkeep under tier changes, and the
//! month-end DRAFT -> pending -> paid/failed transition.

use stratus_core::models::{BillingRecord, BillingStatus, Customer, InvoiceLineItem, ServiceInstance};
use stratus_core::traits::{Clock, UsageSource};
use stratus_core::{AppError, AppResult};
use stratus_db::repositories::{customer_repo, invoice_repo, service_repo};
use stratus_db::LockedCustomer;
use stratus_providers::ProviderRegistry;
use chrono::NaiveDate;
use tracing::{debug, info, instrument};

use crate::settlement::{self, SettlementResult};
use crate::{period, usage};

/// Outcome of one month-end billing cycle
#[derive(Debug)]
pub struct CycleResult {
    pub settled: SettlementResult,
    pub new_draft: BillingRecord,
}

/// Return the customer's DRAFT, creating one if none exists.
///
/// A fresh DRAFT spans the month after the customer's current billing
/// period: the month being prepaid. The period is derived from the
/// customer row, not from today's date, so a customer whose rollover is
/// overdue still gets the draft the pending cycle expects.
#[instrument(skip(session))]
pub async fn get_or_create_draft(
    session: &mut LockedCustomer,
    customer_id: i64,
) -> AppResult<BillingRecord> {
    if let Some(draft) = invoice_repo::find_draft(session.conn(), customer_id).await? {
        return Ok(draft);
    }
    let customer = customer_repo::find_by_id(session.conn(), customer_id)
        .await?
        .ok_or(AppError::CustomerNotFound(customer_id))?;
    let period_start = period::next_month_start(customer.billing_period_start);
    create_draft_for_period(session, customer_id, period_start).await
}

/// Create a DRAFT covering the month starting at `period_start`
#[instrument(skip(session))]
pub async fn create_draft_for_period(
    session: &mut LockedCustomer,
    customer_id: i64,
    period_start: NaiveDate,
) -> AppResult<BillingRecord> {
    let draft = BillingRecord::new_draft(
        customer_id,
        period_start,
        period::next_month_start(period_start),
    );
    invoice_repo::insert(session.conn(), &draft).await?;
    debug!(
        customer_id,
        %period_start,
        draft_id = %draft.id,
        "Opened new draft invoice"
    );
    Ok(draft)
}

/// Rewrite the DRAFT's subscription line for one service so it always
/// equals the price of whichever tier will actually be charged at the next
/// billing boundary. Runs in the same locked transaction as the tier
/// mutation that made it necessary.
#[instrument(skip(session, draft, service))]
pub async fn refresh_draft_subscription_line(
    session: &mut LockedCustomer,
    draft: &BillingRecord,
    service: &ServiceInstance,
) -> AppResult<()> {
    let removed = invoice_repo::delete_line_items_for_service(
        session.conn(),
        draft.id,
        "subscription",
        &service.service_type.to_string(),
    )
    .await?;

    let mut added = 0;
    if service.is_active() {
        if let Some(tier) = service.next_billed_tier() {
            if tier.is_paid() {
                let line = InvoiceLineItem::subscription(draft.id, service.service_type, tier);
                added = line.amount_usd_cents;
                invoice_repo::insert_line_item(session.conn(), &line).await?;
            }
        }
    }

    if added != removed {
        invoice_repo::adjust_total(session.conn(), draft.id, added - removed).await?;
    }

    debug!(
        draft_id = %draft.id,
        service = %service.service_type,
        removed,
        added,
        "Refreshed draft subscription line"
    );

    Ok(())
}

/// Run one month-end billing cycle for a customer whose boundary has
/// arrived: finalize the DRAFT's usage against the month that just ended,
/// settle it, apply any scheduled tier changes that came due, advance the
/// billing period, and open the next DRAFT.
///
/// Safe to re-run: a second invocation in the same cycle finds the boundary
/// already advanced and does nothing at the call site that gates on it.
#[instrument(skip(session, customer, usage_source, registry, clock))]
pub async fn finalize_billing_cycle(
    session: &mut LockedCustomer,
    customer: &Customer,
    usage_source: &dyn UsageSource,
    registry: &ProviderRegistry,
    clock: &dyn Clock,
) -> AppResult<CycleResult> {
    let customer_id = customer.id;
    let services = service_repo::list_for_customer(session.conn(), customer_id).await?;

    // The draft being closed covers the month after the period that just
    // ended. If none exists (first cycle for an old account), open it at
    // the position the customer's period says it should be, not at
    // wall-clock time, so delayed runs stay correct.
    let boundary = period::next_month_start(customer.billing_period_start);
    let draft = match invoice_repo::find_draft(session.conn(), customer_id).await? {
        Some(draft) => draft,
        None => create_draft_for_period(session, customer_id, boundary).await?,
    };

    // Bill the usage period that just ended, derived from the invoice
    // itself rather than from today's date.
    usage::finalize_usage_for_billing(session, &draft, &services, usage_source).await?;

    invoice_repo::set_status(session.conn(), draft.id, BillingStatus::Pending).await?;

    let settled = settlement::process_invoice_payment(session, draft.id, registry, clock).await?;

    // Advance the customer's period to the boundary that was just billed.
    customer_repo::set_billing_period_start(session.conn(), customer_id, boundary).await?;

    // Scheduled downgrades and cancellations take effect at the boundary.
    let mut updated_services = Vec::with_capacity(services.len());
    for mut service in services {
        if let Some(change) = service.apply_due_scheduled_change(boundary) {
            info!(
                customer_id,
                service = %service.service_type,
                change = change.kind_str(),
                "Applied scheduled tier change at billing boundary"
            );
        }
        if settled.outcome.is_paid() && service.is_active() && service.tier.is_paid() {
            service.paid_once = true;
            service.last_billed_at = Some(clock.now());
        }
        service_repo::upsert(session.conn(), &service).await?;
        updated_services.push(service);
    }

    // Open the next accumulator and seed its subscription lines from the
    // post-change tiers.
    let new_draft =
        create_draft_for_period(session, customer_id, period::next_month_start(boundary)).await?;
    for service in &updated_services {
        refresh_draft_subscription_line(session, &new_draft, service).await?;
    }

    info!(
        customer_id,
        closed_draft = %draft.id,
        new_draft = %new_draft.id,
        paid = settled.outcome.is_paid(),
        "Completed billing cycle"
    );

    Ok(CycleResult { settled, new_draft })
}

