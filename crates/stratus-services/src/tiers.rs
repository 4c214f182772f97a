//! Tier change engine
//!
//! State machine over `(tier, scheduled_change)`:
//!
//! - upgrades are immediate and pro-rated, charged inside the same locked
//!   transaction, and always clear any scheduled downgrade or cancellation
//! - downgrades and cancellations of a previously paid subscription take
//!   effect at the end of the current billing period; never-paid
//!   subscriptions change immediately
//! - after every transition the DRAFT's subscription line is rewritten to
//!   the price of whichever tier will actually be billed next
//!
//! All functions require a `LockedCustomer` session; the caller (API layer
//! or periodic job) owns the lock and the final commit.

use stratus_core::models::{
    BillingRecord, BillingStatus, InvoiceLineItem, ScheduledChange, ServiceInstance, ServiceState,
    ServiceType, Tier,
};
use stratus_core::traits::Clock;
use stratus_core::{AppError, AppResult};
use stratus_db::repositories::{customer_repo, invoice_repo, service_repo};
use stratus_db::LockedCustomer;
use stratus_providers::ProviderRegistry;
use tracing::{info, instrument, warn};

use crate::invoices;
use crate::period;
use crate::settlement::{self, SettlementResult};

/// Result of a tier operation
#[derive(Debug)]
pub struct TierChangeResult {
    pub service: ServiceInstance,
    /// Settlement of the immediate charge, when one was attempted
    pub settlement: Option<SettlementResult>,
}

impl TierChangeResult {
    /// Whether an immediate charge was attempted and did not settle
    pub fn payment_pending(&self) -> bool {
        self.service.sub_pending_invoice_id.is_some()
            || self
                .settlement
                .as_ref()
                .map_or(false, |s| !s.outcome.is_paid())
    }
}

/// Create an immediate, pro-rated invoice for the remainder of the current
/// month and attempt settlement.
async fn charge_immediate_proration(
    session: &mut LockedCustomer,
    service_type: ServiceType,
    from_tier: Tier,
    to_tier: Tier,
    registry: &ProviderRegistry,
    clock: &dyn Clock,
) -> AppResult<(BillingRecord, SettlementResult)> {
    let customer_id = session.customer_id();
    let today = clock.today();

    let mut invoice = BillingRecord::new_draft(
        customer_id,
        period::month_start(today),
        period::next_month_start(today),
    );
    // This is an immediate charge, not the forward-looking accumulator.
    invoice.status = BillingStatus::Pending;
    invoice_repo::insert(session.conn(), &invoice).await?;

    let line = InvoiceLineItem::proration(
        invoice.id,
        service_type,
        from_tier,
        to_tier,
        period::days_remaining_in_month(today),
        period::days_in_month(today),
    );
    invoice_repo::adjust_total(session.conn(), invoice.id, line.amount_usd_cents).await?;
    invoice_repo::insert_line_item(session.conn(), &line).await?;

    let settled = settlement::process_invoice_payment(session, invoice.id, registry, clock).await?;
    Ok((invoice, settled))
}

/// Subscribe a customer to a service at a tier.
///
/// Paid tiers are charged immediately, pro-rated for the remainder of the
/// current month. A failed charge still provisions the instance but leaves
/// `sub_pending_invoice_id` pointing at the unpaid record: usage billing is
/// blocked until the customer retries successfully.
#[instrument(skip(session, registry, clock))]
pub async fn subscribe(
    session: &mut LockedCustomer,
    service_type: ServiceType,
    tier: Tier,
    registry: &ProviderRegistry,
    clock: &dyn Clock,
) -> AppResult<TierChangeResult> {
    let customer_id = session.customer_id();
    let customer = customer_repo::get_for_update(session.conn(), customer_id).await?;

    let existing = service_repo::find(session.conn(), customer_id, service_type).await?;
    if let Some(svc) = &existing {
        if svc.is_active() {
            return Err(AppError::AlreadyExists(format!(
                "{} is already subscribed at tier {}; use upgrade or downgrade",
                service_type, svc.tier
            )));
        }
    }

    let mut service = existing.unwrap_or(ServiceInstance {
        customer_id,
        service_type,
        tier: Tier::Free,
        state: ServiceState::NotProvisioned,
        scheduled_change: None,
        scheduled_effective_date: None,
        sub_pending_invoice_id: None,
        paid_once: false,
        last_billed_at: None,
        created_at: clock.now(),
        updated_at: clock.now(),
    });

    let mut settlement_result = None;
    service.tier = tier;
    service.state = ServiceState::Enabled;
    service.scheduled_change = None;
    service.scheduled_effective_date = None;

    if tier.is_paid() {
        let (invoice, settled) = charge_immediate_proration(
            session,
            service_type,
            Tier::Free,
            tier,
            registry,
            clock,
        )
        .await?;

        if settled.outcome.is_paid() {
            service.paid_once = true;
            service.sub_pending_invoice_id = None;
            service.last_billed_at = Some(clock.now());
        } else {
            warn!(
                customer_id,
                service = %service_type,
                invoice_id = %invoice.id,
                "Subscription charge failed; activation blocked on payment"
            );
            service.sub_pending_invoice_id = Some(invoice.id);
        }
        settlement_result = Some(settled);
    }

    service_repo::upsert(session.conn(), &service).await?;

    let draft = invoices::get_or_create_draft(session, customer.id).await?;
    invoices::refresh_draft_subscription_line(session, &draft, &service).await?;

    info!(
        customer_id,
        service = %service_type,
        %tier,
        payment_pending = service.sub_pending_invoice_id.is_some(),
        "Subscribed service"
    );

    Ok(TierChangeResult {
        service,
        settlement: settlement_result,
    })
}

/// Retry the unpaid subscription charge blocking a service.
///
/// Fails fast with a precondition error when the previous attempt requires
/// out-of-band authentication; the customer must complete the hosted flow
/// instead.
#[instrument(skip(session, registry, clock))]
pub async fn retry_subscription_payment(
    session: &mut LockedCustomer,
    service_type: ServiceType,
    registry: &ProviderRegistry,
    clock: &dyn Clock,
) -> AppResult<TierChangeResult> {
    let customer_id = session.customer_id();

    let mut service = service_repo::find(session.conn(), customer_id, service_type)
        .await?
        .ok_or_else(|| AppError::ServiceNotFound(service_type.to_string()))?;

    let invoice_id = service.sub_pending_invoice_id.ok_or_else(|| {
        AppError::Conflict(format!("{} has no pending subscription payment", service_type))
    })?;

    let settled = settlement::process_invoice_payment(session, invoice_id, registry, clock).await?;

    if settled.outcome.is_paid() {
        service.sub_pending_invoice_id = None;
        service.paid_once = true;
        service.last_billed_at = Some(clock.now());
        service_repo::upsert(session.conn(), &service).await?;
        info!(
            customer_id,
            service = %service_type,
            "Pending subscription payment settled"
        );
    }

    Ok(TierChangeResult {
        service,
        settlement: Some(settled),
    })
}

/// Immediate, pro-rated upgrade.
///
/// The charge is `(new - old) * days_remaining / days_in_period`, floored,
/// settled through the provider chain inside this same locked transaction.
/// On success the upgrade also cancels any scheduled downgrade or
/// cancellation, leaving no trace of it in the DRAFT.
#[instrument(skip(session, registry, clock))]
pub async fn handle_tier_upgrade(
    session: &mut LockedCustomer,
    service_type: ServiceType,
    new_tier: Tier,
    registry: &ProviderRegistry,
    clock: &dyn Clock,
) -> AppResult<TierChangeResult> {
    let customer_id = session.customer_id();
    let customer = customer_repo::get_for_update(session.conn(), customer_id).await?;

    let mut service = service_repo::find(session.conn(), customer_id, service_type)
        .await?
        .ok_or_else(|| AppError::ServiceNotFound(service_type.to_string()))?;

    if !service.is_active() {
        return Err(AppError::Conflict(format!(
            "{} is not an active subscription",
            service_type
        )));
    }
    if !service.tier.is_upgrade_to(new_tier) {
        return Err(AppError::InvalidInput(format!(
            "{} -> {} is not an upgrade; schedule a downgrade instead",
            service.tier, new_tier
        )));
    }

    let from_tier = service.tier;
    let (_, settled) = charge_immediate_proration(
        session,
        service_type,
        from_tier,
        new_tier,
        registry,
        clock,
    )
    .await?;

    if !settled.outcome.is_paid() {
        // Tier unchanged; the failed record carries the reason and any
        // authentication URL. Credits already applied to it stay applied.
        warn!(
            customer_id,
            service = %service_type,
            "Upgrade charge failed; tier unchanged"
        );
        return Ok(TierChangeResult {
            service,
            settlement: Some(settled),
        });
    }

    service.apply_upgrade(new_tier);
    service.paid_once = true;
    service.last_billed_at = Some(clock.now());
    service_repo::upsert(session.conn(), &service).await?;

    let draft = invoices::get_or_create_draft(session, customer.id).await?;
    invoices::refresh_draft_subscription_line(session, &draft, &service).await?;

    info!(
        customer_id,
        service = %service_type,
        from = %from_tier,
        to = %new_tier,
        "Upgraded tier"
    );

    Ok(TierChangeResult {
        service,
        settlement: Some(settled),
    })
}

/// Schedule a downgrade for the end of the current billing period.
///
/// A subscription that has never completed a paid cycle downgrades
/// immediately: nothing was prepaid, so nothing is owed back.
#[instrument(skip(session, clock))]
pub async fn schedule_tier_downgrade(
    session: &mut LockedCustomer,
    service_type: ServiceType,
    target_tier: Tier,
    clock: &dyn Clock,
) -> AppResult<TierChangeResult> {
    let customer_id = session.customer_id();
    let customer = customer_repo::get_for_update(session.conn(), customer_id).await?;

    let mut service = service_repo::find(session.conn(), customer_id, service_type)
        .await?
        .ok_or_else(|| AppError::ServiceNotFound(service_type.to_string()))?;

    if !service.is_active() {
        return Err(AppError::Conflict(format!(
            "{} is not an active subscription",
            service_type
        )));
    }
    if !target_tier.is_paid() {
        return Err(AppError::InvalidInput(
            "downgrade target must be a paid tier; use cancellation to stop billing".to_string(),
        ));
    }
    if !target_tier.is_upgrade_to(service.tier) {
        return Err(AppError::InvalidInput(format!(
            "{} -> {} is not a downgrade",
            service.tier, target_tier
        )));
    }

    if service.paid_once {
        // Replaces any previously scheduled change; at most one pending.
        service.scheduled_change = Some(ScheduledChange::Downgrade { to: target_tier });
        service.scheduled_effective_date =
            Some(period::next_month_start(customer.billing_period_start));
    } else {
        service.tier = target_tier;
        service.scheduled_change = None;
        service.scheduled_effective_date = None;
    }
    service_repo::upsert(session.conn(), &service).await?;

    // The DRAFT bills what will actually be charged next: the target tier.
    let draft = invoices::get_or_create_draft(session, customer.id).await?;
    invoices::refresh_draft_subscription_line(session, &draft, &service).await?;

    info!(
        customer_id,
        service = %service_type,
        target = %target_tier,
        immediate = !service.paid_once,
        "Scheduled tier downgrade"
    );

    Ok(TierChangeResult {
        service,
        settlement: None,
    })
}

/// Schedule end-of-period cancellation (immediate when never paid)
#[instrument(skip(session, clock))]
pub async fn schedule_cancellation(
    session: &mut LockedCustomer,
    service_type: ServiceType,
    clock: &dyn Clock,
) -> AppResult<TierChangeResult> {
    let customer_id = session.customer_id();
    let customer = customer_repo::get_for_update(session.conn(), customer_id).await?;

    let mut service = service_repo::find(session.conn(), customer_id, service_type)
        .await?
        .ok_or_else(|| AppError::ServiceNotFound(service_type.to_string()))?;

    if !service.is_active() {
        return Err(AppError::Conflict(format!(
            "{} is not an active subscription",
            service_type
        )));
    }

    if service.paid_once {
        service.scheduled_change = Some(ScheduledChange::Cancel);
        service.scheduled_effective_date =
            Some(period::next_month_start(customer.billing_period_start));
    } else {
        service.tier = Tier::Free;
        service.state = ServiceState::NotProvisioned;
        service.scheduled_change = None;
        service.scheduled_effective_date = None;
    }
    service_repo::upsert(session.conn(), &service).await?;

    let draft = invoices::get_or_create_draft(session, customer.id).await?;
    invoices::refresh_draft_subscription_line(session, &draft, &service).await?;

    info!(
        customer_id,
        service = %service_type,
        immediate = !service.paid_once,
        "Scheduled cancellation"
    );

    Ok(TierChangeResult {
        service,
        settlement: None,
    })
}

/// Undo a scheduled cancellation before its effective date
#[instrument(skip(session))]
pub async fn undo_cancellation(
    session: &mut LockedCustomer,
    service_type: ServiceType,
) -> AppResult<TierChangeResult> {
    let customer_id = session.customer_id();

    let mut service = service_repo::find(session.conn(), customer_id, service_type)
        .await?
        .ok_or_else(|| AppError::ServiceNotFound(service_type.to_string()))?;

    if !matches!(service.scheduled_change, Some(ScheduledChange::Cancel)) {
        return Err(AppError::Conflict(format!(
            "{} has no scheduled cancellation",
            service_type
        )));
    }

    service.scheduled_change = None;
    service.scheduled_effective_date = None;
    service_repo::upsert(session.conn(), &service).await?;

    let draft = invoices::get_or_create_draft(session, customer_id).await?;
    invoices::refresh_draft_subscription_line(session, &draft, &service).await?;

    info!(customer_id, service = %service_type, "Cancellation undone");

    Ok(TierChangeResult {
        service,
        settlement: None,
    })
}

/// Clear a scheduled downgrade or cancellation without changing the tier,
/// restoring the DRAFT to the current tier's price
#[instrument(skip(session))]
pub async fn cancel_scheduled_tier_change(
    session: &mut LockedCustomer,
    service_type: ServiceType,
) -> AppResult<TierChangeResult> {
    let customer_id = session.customer_id();

    let mut service = service_repo::find(session.conn(), customer_id, service_type)
        .await?
        .ok_or_else(|| AppError::ServiceNotFound(service_type.to_string()))?;

    if service.scheduled_change.is_none() {
        return Err(AppError::Conflict(format!(
            "{} has no scheduled tier change",
            service_type
        )));
    }

    service.scheduled_change = None;
    service.scheduled_effective_date = None;
    service_repo::upsert(session.conn(), &service).await?;

    let draft = invoices::get_or_create_draft(session, customer_id).await?;
    invoices::refresh_draft_subscription_line(session, &draft, &service).await?;

    info!(customer_id, service = %service_type, "Scheduled tier change cleared");

    Ok(TierChangeResult {
        service,
        settlement: None,
    })
}
