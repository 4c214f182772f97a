//! Periodic billing job
//!
//! The per-customer driver, idempotent and safe to re-run. One invocation
//! acquires the customer lock once and then:
//!
//! (a) syncs the DRAFT's usage-for-display lines,
//! (b) processes every billing-cycle boundary that has arrived (normally
//!     zero or one; more only when processing was delayed),
//! (c) retries previously failed invoices that are retryable, within the
//!     configured attempt limit and spacing.
//!
//! Re-running in the same cycle is harmless: the boundary has advanced,
//! settled invoices settle to themselves, and retry bookkeeping gates
//! duplicate attempts.

use sqlx::PgPool;
use stratus_core::config::BillingConfig;
use stratus_core::traits::{Clock, UsageSource};
use stratus_core::{AppError, AppResult};
use stratus_db::repositories::{customer_repo, invoice_repo, service_repo};
use stratus_db::{CustomerLock, LockedCustomer};
use stratus_providers::ProviderRegistry;
use tracing::{debug, info, instrument, warn};

use crate::constants::{JOB_BATCH_LIMIT, MAX_CYCLES_PER_RUN};
use crate::settlement::SettlementOutcome;
use crate::{invoices, period, settlement, usage};

/// Dependencies threaded through the job
pub struct BillingJobDeps<'a> {
    pub registry: &'a ProviderRegistry,
    pub usage_source: &'a dyn UsageSource,
    pub clock: &'a dyn Clock,
    pub config: &'a BillingConfig,
}

/// What one invocation did
#[derive(Debug, Default, Clone)]
pub struct BillingJobReport {
    pub customer_id: i64,
    pub cycles_processed: u32,
    pub retries_attempted: u32,
    pub retries_succeeded: u32,
}

/// Run the periodic billing job for one customer.
///
/// All three phases execute under a single customer-lock acquisition; the
/// session commits once at the end.
#[instrument(skip(pool, deps))]
pub async fn run_billing_for_customer(
    pool: &PgPool,
    customer_id: i64,
    deps: &BillingJobDeps<'_>,
) -> AppResult<BillingJobReport> {
    let mut session =
        CustomerLock::acquire(pool, customer_id, "periodic_billing", deps.config).await?;

    let report = match drive_phases(&mut session, customer_id, deps).await {
        Ok(report) => report,
        Err(e) => {
            // Roll everything back; the next invocation starts clean.
            session.rollback().await.ok();
            return Err(e);
        }
    };

    session.commit().await?;
    Ok(report)
}

async fn drive_phases(
    session: &mut LockedCustomer,
    customer_id: i64,
    deps: &BillingJobDeps<'_>,
) -> AppResult<BillingJobReport> {
    let mut report = BillingJobReport {
        customer_id,
        ..Default::default()
    };

    let mut customer = customer_repo::get_for_update(session.conn(), customer_id).await?;
    let today = deps.clock.today();

    // Phase (a): usage display sync on the current DRAFT.
    let services = service_repo::list_for_customer(session.conn(), customer_id).await?;
    let draft = invoices::get_or_create_draft(session, customer_id).await?;
    usage::sync_usage_to_draft(session, &draft, &services, deps.usage_source, deps.clock).await?;

    // Phase (b): month-end transitions for every boundary that has arrived.
    while period::next_month_start(customer.billing_period_start) <= today {
        if report.cycles_processed >= MAX_CYCLES_PER_RUN {
            warn!(
                customer_id,
                cycles = report.cycles_processed,
                "Cycle catch-up bound reached; remaining cycles deferred to the next run"
            );
            break;
        }

        invoices::finalize_billing_cycle(
            session,
            &customer,
            deps.usage_source,
            deps.registry,
            deps.clock,
        )
        .await?;
        report.cycles_processed += 1;

        customer = customer_repo::get_for_update(session.conn(), customer_id).await?;
    }

    // Phase (c): automatic retries of failed, retryable invoices.
    let failed = invoice_repo::list_failed_for_customer(session.conn(), customer_id).await?;
    for record in failed {
        if record.awaits_authentication() {
            debug!(
                customer_id,
                invoice_id = %record.id,
                "Skipping retry: awaiting customer authentication"
            );
            continue;
        }
        if !record.eligible_for_auto_retry(
            deps.config.max_retry_attempts,
            deps.config.retry_interval_hours,
            deps.clock.now(),
        ) {
            continue;
        }

        report.retries_attempted += 1;
        let result =
            settlement::process_invoice_payment(session, record.id, deps.registry, deps.clock)
                .await?;
        match result.outcome {
            SettlementOutcome::Paid => {
                report.retries_succeeded += 1;
                // A settled subscription charge unblocks its service.
                clear_pending_subscription_marker(session, customer_id, record.id).await?;
            }
            SettlementOutcome::Failed { ref reason, .. } => {
                debug!(
                    customer_id,
                    invoice_id = %record.id,
                    "Automatic retry failed: {}",
                    reason
                );
            }
        }
    }

    info!(
        customer_id,
        cycles = report.cycles_processed,
        retries = report.retries_attempted,
        retried_ok = report.retries_succeeded,
        "Periodic billing run complete"
    );

    Ok(report)
}

/// Clear `sub_pending_invoice_id` on whichever service was blocked by the
/// invoice that just settled.
async fn clear_pending_subscription_marker(
    session: &mut LockedCustomer,
    customer_id: i64,
    invoice_id: uuid::Uuid,
) -> AppResult<()> {
    let services = service_repo::list_for_customer(session.conn(), customer_id).await?;
    for mut service in services {
        if service.sub_pending_invoice_id == Some(invoice_id) {
            service.sub_pending_invoice_id = None;
            service.paid_once = true;
            service_repo::upsert(session.conn(), &service).await?;
        }
    }
    Ok(())
}

/// Run the job for every customer whose billing boundary has arrived.
///
/// Lock contention on individual customers is skipped, not fatal: the
/// contending operation holds the same lock this job would take, and the
/// next batch picks the customer up again.
#[instrument(skip(pool, deps))]
pub async fn run_billing_batch(
    pool: &PgPool,
    deps: &BillingJobDeps<'_>,
) -> AppResult<Vec<BillingJobReport>> {
    let mut conn = pool
        .acquire()
        .await
        .map_err(|e| AppError::Pool(format!("Failed to acquire connection: {}", e)))?;

    let due =
        customer_repo::ids_due_for_billing(&mut conn, deps.clock.today(), JOB_BATCH_LIMIT).await?;
    drop(conn);

    let mut reports = Vec::with_capacity(due.len());
    for customer_id in due {
        match run_billing_for_customer(pool, customer_id, deps).await {
            Ok(report) => reports.push(report),
            Err(AppError::CustomerBusy { .. }) => {
                debug!(customer_id, "Customer busy; deferring to next batch");
            }
            Err(e) => {
                warn!(customer_id, "Billing run failed: {}", e);
            }
        }
    }

    Ok(reports)
}
