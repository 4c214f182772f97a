//! Usage charge calculator
//!
//! Two temporal contracts that must not be confused:
//!
//! - **Display sync** recomputes the DRAFT's usage lines against the
//!   current calendar month so far, on every periodic tick.
//! - **Billing finalization** bills the calendar month immediately
//!   preceding the invoice's own billing period, derived from the invoice
//!   and never from wall-clock time.
//!
//! Both are idempotent delete-then-reinsert recomputes that adjust the
//! invoice total by the delta, so subscription charges applied concurrently
//! to the same invoice are never double counted.

use chrono::{DateTime, Utc};
use stratus_core::models::{BillingRecord, InvoiceLineItem, ServiceInstance};
use stratus_core::traits::{Clock, UsageSource};
use stratus_core::AppResult;
use stratus_db::repositories::invoice_repo;
use stratus_db::LockedCustomer;
use tracing::{debug, instrument};

use crate::period;

/// Recompute the DRAFT's usage-for-display lines over
/// `[month_start, now)`. Produces a line for every actively subscribed
/// service, including zero-quantity lines, skipping services blocked by an
/// unpaid pending subscription charge.
///
/// Returns the new usage total in cents.
#[instrument(skip(session, draft, services, source, clock))]
pub async fn sync_usage_to_draft(
    session: &mut LockedCustomer,
    draft: &BillingRecord,
    services: &[ServiceInstance],
    source: &dyn UsageSource,
    clock: &dyn Clock,
) -> AppResult<i64> {
    let (start, end) = period::display_usage_window(clock.now());
    recompute_usage_lines(session, draft, services, source, start, end).await
}

/// Recompute an invoice's usage lines for the usage period it bills: the
/// calendar month immediately preceding `billing_period_start`. Correct
/// even when executed late; a February invoice bills January's usage no
/// matter when the job actually runs.
///
/// Returns the finalized usage total in cents.
#[instrument(skip(session, invoice, services, source))]
pub async fn finalize_usage_for_billing(
    session: &mut LockedCustomer,
    invoice: &BillingRecord,
    services: &[ServiceInstance],
    source: &dyn UsageSource,
) -> AppResult<i64> {
    let (start, end) = period::billing_usage_window(invoice.billing_period_start);
    recompute_usage_lines(session, invoice, services, source, start, end).await
}

/// Delete-then-reinsert the usage lines for one window. The invoice total
/// moves by the delta against what was removed, not by a full re-sum, so
/// other line items on the record stay untouched.
async fn recompute_usage_lines(
    session: &mut LockedCustomer,
    invoice: &BillingRecord,
    services: &[ServiceInstance],
    source: &dyn UsageSource,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> AppResult<i64> {
    let removed =
        invoice_repo::delete_line_items_of_kind(session.conn(), invoice.id, "usage").await?;

    let mut total = 0;
    for service in services.iter().filter(|s| s.is_usage_billable()) {
        // Window is inclusive of start, exclusive of end.
        let count = source
            .get_billable_request_count(service.customer_id, service.service_type, start, end)
            .await?;

        let rate = service.tier.usage_cents_per_1000(service.service_type);
        let line = InvoiceLineItem::usage(
            invoice.id,
            service.service_type,
            start.date_naive(),
            end.date_naive(),
            count,
            rate,
        );
        total += line.amount_usd_cents;
        invoice_repo::insert_line_item(session.conn(), &line).await?;

        debug!(
            invoice_id = %invoice.id,
            service = %service.service_type,
            count,
            rate,
            amount_cents = line.amount_usd_cents,
            "Recomputed usage line"
        );
    }

    if total != removed {
        invoice_repo::adjust_total(session.conn(), invoice.id, total - removed).await?;
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use stratus_core::models::ServiceType;
    use stratus_core::AppError;

    /// In-memory usage source honoring the inclusive-start/exclusive-end
    /// window contract.
    struct MemoryUsageSource {
        events: Vec<(i64, ServiceType, DateTime<Utc>)>,
    }

    #[async_trait]
    impl UsageSource for MemoryUsageSource {
        async fn get_billable_request_count(
            &self,
            customer_id: i64,
            service_type: ServiceType,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Result<i64, AppError> {
            Ok(self
                .events
                .iter()
                .filter(|(c, s, t)| *c == customer_id && *s == service_type && start <= *t && *t < end)
                .count() as i64)
        }
    }

    #[tokio::test]
    async fn test_billing_window_boundary_exactness() {
        // Invoice with billing period February bills January. A request at
        // exactly Jan 1 00:00 is counted; one at exactly Feb 1 00:00 is not.
        let jan_start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let feb_start = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();
        let mid_jan = Utc.with_ymd_and_hms(2025, 1, 15, 8, 0, 0).unwrap();

        let source = MemoryUsageSource {
            events: vec![
                (1, ServiceType::Rpc, jan_start),
                (1, ServiceType::Rpc, mid_jan),
                (1, ServiceType::Rpc, feb_start),
            ],
        };

        let (start, end) = period::billing_usage_window(
            chrono::NaiveDate::from_ymd_opt(2025, 2, 1).unwrap(),
        );
        let count = source
            .get_billable_request_count(1, ServiceType::Rpc, start, end)
            .await
            .unwrap();

        assert_eq!(count, 2, "start boundary counted, end boundary excluded");
    }

    #[tokio::test]
    async fn test_accrual_is_monotonic_within_window() {
        let mid_jan = Utc.with_ymd_and_hms(2025, 1, 15, 8, 0, 0).unwrap();
        let mut source = MemoryUsageSource {
            events: vec![(1, ServiceType::Indexer, mid_jan)],
        };

        let (start, end) = period::billing_usage_window(
            chrono::NaiveDate::from_ymd_opt(2025, 2, 1).unwrap(),
        );

        let before = source
            .get_billable_request_count(1, ServiceType::Indexer, start, end)
            .await
            .unwrap();

        source.events.push((1, ServiceType::Indexer, mid_jan));
        source.events.push((1, ServiceType::Indexer, mid_jan));

        let after = source
            .get_billable_request_count(1, ServiceType::Indexer, start, end)
            .await
            .unwrap();

        assert_eq!(after - before, 2);
    }

    #[tokio::test]
    async fn test_other_customers_usage_not_counted() {
        let mid_jan = Utc.with_ymd_and_hms(2025, 1, 15, 8, 0, 0).unwrap();
        let source = MemoryUsageSource {
            events: vec![(2, ServiceType::Rpc, mid_jan)],
        };

        let (start, end) = period::billing_usage_window(
            chrono::NaiveDate::from_ymd_opt(2025, 2, 1).unwrap(),
        );
        let count = source
            .get_billable_request_count(1, ServiceType::Rpc, start, end)
            .await
            .unwrap();

        assert_eq!(count, 0);
    }
}
