//! Billing record (invoice) repository
//!
//! Storage for billing records, their line items, and their payments.

use sqlx::PgConnection;
use stratus_core::models::{BillingRecord, BillingStatus, InvoiceLineItem, InvoicePayment};
use stratus_core::{AppError, AppResult};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use crate::rows::{
    BillingRecordRow, InvoicePaymentRow, LineItemRow, BILLING_RECORD_COLUMNS, LINE_ITEM_COLUMNS,
};

/// Find a billing record by id
#[instrument(skip(conn))]
pub async fn find_by_id(conn: &mut PgConnection, id: Uuid) -> AppResult<Option<BillingRecord>> {
    let result = sqlx::query_as::<sqlx::Postgres, BillingRecordRow>(&format!(
        "SELECT {BILLING_RECORD_COLUMNS} FROM billing_records WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await
    .map_err(|e| {
        error!("Database error finding billing record {}: {}", id, e);
        AppError::Database(format!("Failed to find billing record: {}", e))
    })?;

    Ok(result.map(Into::into))
}

/// The customer's single DRAFT record, if one exists
#[instrument(skip(conn))]
pub async fn find_draft(
    conn: &mut PgConnection,
    customer_id: i64,
) -> AppResult<Option<BillingRecord>> {
    let result = sqlx::query_as::<sqlx::Postgres, BillingRecordRow>(&format!(
        "SELECT {BILLING_RECORD_COLUMNS} FROM billing_records \
         WHERE customer_id = $1 AND status = 'draft'"
    ))
    .bind(customer_id)
    .fetch_optional(conn)
    .await
    .map_err(|e| {
        error!("Database error finding draft for customer {}: {}", customer_id, e);
        AppError::Database(format!("Failed to find draft invoice: {}", e))
    })?;

    Ok(result.map(Into::into))
}

/// Insert a billing record
#[instrument(skip(conn, record))]
pub async fn insert(conn: &mut PgConnection, record: &BillingRecord) -> AppResult<()> {
    debug!(
        "Inserting billing record {} for customer {}",
        record.id, record.customer_id
    );

    sqlx::query(
        r#"
        INSERT INTO billing_records (
            id, customer_id, billing_period_start, billing_period_end,
            status, record_type, amount_usd_cents, amount_paid_usd_cents,
            failure_reason, payment_action_url, retry_count, last_retry_at,
            retryable, tx_digest
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        "#,
    )
    .bind(record.id)
    .bind(record.customer_id)
    .bind(record.billing_period_start)
    .bind(record.billing_period_end)
    .bind(record.status.to_string())
    .bind(record.record_type.to_string())
    .bind(record.amount_usd_cents)
    .bind(record.amount_paid_usd_cents)
    .bind(&record.failure_reason)
    .bind(&record.payment_action_url)
    .bind(record.retry_count)
    .bind(record.last_retry_at)
    .bind(record.retryable)
    .bind(&record.tx_digest)
    .execute(conn)
    .await
    .map_err(|e| {
        error!("Database error inserting billing record: {}", e);
        AppError::Database(format!("Failed to insert billing record: {}", e))
    })?;

    Ok(())
}

/// Move a record to a new status
#[instrument(skip(conn))]
pub async fn set_status(
    conn: &mut PgConnection,
    id: Uuid,
    status: BillingStatus,
) -> AppResult<()> {
    sqlx::query(
        "UPDATE billing_records SET status = $2, updated_at = NOW() WHERE id = $1",
    )
    .bind(id)
    .bind(status.to_string())
    .execute(conn)
    .await
    .map_err(|e| {
        error!("Database error updating billing record status: {}", e);
        AppError::Database(format!("Failed to update billing record status: {}", e))
    })?;

    Ok(())
}

/// Record a successful settlement: bump the paid amount, set `paid`, clear
/// any stale failure bookkeeping, and stamp the escrow digest if one exists.
#[instrument(skip(conn))]
pub async fn mark_paid(
    conn: &mut PgConnection,
    id: Uuid,
    amount_paid_usd_cents: i64,
    tx_digest: Option<&str>,
) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE billing_records
        SET status = 'paid',
            amount_paid_usd_cents = $2,
            failure_reason = NULL,
            payment_action_url = NULL,
            tx_digest = COALESCE($3, tx_digest),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(amount_paid_usd_cents)
    .bind(tx_digest)
    .execute(conn)
    .await
    .map_err(|e| {
        error!("Database error marking billing record paid: {}", e);
        AppError::Database(format!("Failed to mark billing record paid: {}", e))
    })?;

    Ok(())
}

/// Record a failed settlement attempt
#[instrument(skip(conn, failure_reason, payment_action_url))]
pub async fn mark_failed(
    conn: &mut PgConnection,
    id: Uuid,
    amount_paid_usd_cents: i64,
    failure_reason: &str,
    payment_action_url: Option<&str>,
    retryable: bool,
) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE billing_records
        SET status = 'failed',
            amount_paid_usd_cents = $2,
            failure_reason = $3,
            payment_action_url = $4,
            retryable = $5,
            retry_count = retry_count + 1,
            last_retry_at = NOW(),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(amount_paid_usd_cents)
    .bind(failure_reason)
    .bind(payment_action_url)
    .bind(retryable)
    .execute(conn)
    .await
    .map_err(|e| {
        error!("Database error marking billing record failed: {}", e);
        AppError::Database(format!("Failed to mark billing record failed: {}", e))
    })?;

    Ok(())
}

/// Adjust the record total by `delta_cents`
#[instrument(skip(conn))]
pub async fn adjust_total(conn: &mut PgConnection, id: Uuid, delta_cents: i64) -> AppResult<i64> {
    let result: (i64,) = sqlx::query_as(
        r#"
        UPDATE billing_records
        SET amount_usd_cents = amount_usd_cents + $2,
            updated_at = NOW()
        WHERE id = $1
        RETURNING amount_usd_cents
        "#,
    )
    .bind(id)
    .bind(delta_cents)
    .fetch_one(conn)
    .await
    .map_err(|e| {
        error!("Database error adjusting invoice total: {}", e);
        AppError::Database(format!("Failed to adjust invoice total: {}", e))
    })?;

    Ok(result.0)
}

/// List a customer's billing records, newest first
#[instrument(skip(conn))]
pub async fn list_for_customer(
    conn: &mut PgConnection,
    customer_id: i64,
    status: Option<BillingStatus>,
    limit: i64,
    offset: i64,
) -> AppResult<(Vec<BillingRecord>, i64)> {
    debug!(
        "Listing billing records: customer={}, status={:?}",
        customer_id, status
    );

    let status_str = status.map(|s| s.to_string());

    let total: (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM billing_records
        WHERE customer_id = $1 AND ($2::text IS NULL OR status = $2)
        "#,
    )
    .bind(customer_id)
    .bind(&status_str)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| {
        error!("Database error counting billing records: {}", e);
        AppError::Database(format!("Failed to count billing records: {}", e))
    })?;

    let rows = sqlx::query_as::<sqlx::Postgres, BillingRecordRow>(&format!(
        r#"
        SELECT {BILLING_RECORD_COLUMNS} FROM billing_records
        WHERE customer_id = $1 AND ($2::text IS NULL OR status = $2)
        ORDER BY created_at DESC
        LIMIT $3 OFFSET $4
        "#
    ))
    .bind(customer_id)
    .bind(&status_str)
    .bind(limit)
    .bind(offset)
    .fetch_all(conn)
    .await
    .map_err(|e| {
        error!("Database error listing billing records: {}", e);
        AppError::Database(format!("Failed to list billing records: {}", e))
    })?;

    Ok((rows.into_iter().map(Into::into).collect(), total.0))
}

/// Failed records eligible for automatic retry consideration
#[instrument(skip(conn))]
pub async fn list_failed_for_customer(
    conn: &mut PgConnection,
    customer_id: i64,
) -> AppResult<Vec<BillingRecord>> {
    let rows = sqlx::query_as::<sqlx::Postgres, BillingRecordRow>(&format!(
        "SELECT {BILLING_RECORD_COLUMNS} FROM billing_records \
         WHERE customer_id = $1 AND status = 'failed' \
         ORDER BY created_at"
    ))
    .bind(customer_id)
    .fetch_all(conn)
    .await
    .map_err(|e| {
        error!("Database error listing failed records: {}", e);
        AppError::Database(format!("Failed to list failed records: {}", e))
    })?;

    Ok(rows.into_iter().map(Into::into).collect())
}

// ==================== Line items ====================

/// Insert a line item
#[instrument(skip(conn, item))]
pub async fn insert_line_item(conn: &mut PgConnection, item: &InvoiceLineItem) -> AppResult<()> {
    let detail = serde_json::to_value(&item.kind)
        .map_err(|e| AppError::Serialization(e.to_string()))?;

    sqlx::query(
        r#"
        INSERT INTO invoice_line_items (
            id, billing_record_id, item_type, detail,
            quantity, unit_price_usd_cents, amount_usd_cents
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(item.id)
    .bind(item.billing_record_id)
    .bind(item.kind.kind_str())
    .bind(detail)
    .bind(item.quantity)
    .bind(item.unit_price_usd_cents)
    .bind(item.amount_usd_cents)
    .execute(conn)
    .await
    .map_err(|e| {
        error!("Database error inserting line item: {}", e);
        AppError::Database(format!("Failed to insert line item: {}", e))
    })?;

    Ok(())
}

/// Delete all line items of one kind from a record, returning the total
/// amount removed. Used by the idempotent delete-then-reinsert recomputes.
#[instrument(skip(conn))]
pub async fn delete_line_items_of_kind(
    conn: &mut PgConnection,
    billing_record_id: Uuid,
    kind_str: &str,
) -> AppResult<i64> {
    let removed: (i64,) = sqlx::query_as(
        r#"
        WITH deleted AS (
            DELETE FROM invoice_line_items
            WHERE billing_record_id = $1 AND item_type = $2
            RETURNING amount_usd_cents
        )
        SELECT COALESCE(SUM(amount_usd_cents), 0) FROM deleted
        "#,
    )
    .bind(billing_record_id)
    .bind(kind_str)
    .fetch_one(conn)
    .await
    .map_err(|e| {
        error!("Database error deleting line items: {}", e);
        AppError::Database(format!("Failed to delete line items: {}", e))
    })?;

    Ok(removed.0)
}

/// Delete line items of one kind scoped to one service, returning the total
/// amount removed. Subscription and proration rewrites are per-service.
#[instrument(skip(conn))]
pub async fn delete_line_items_for_service(
    conn: &mut PgConnection,
    billing_record_id: Uuid,
    kind_str: &str,
    service_type: &str,
) -> AppResult<i64> {
    let removed: (i64,) = sqlx::query_as(
        r#"
        WITH deleted AS (
            DELETE FROM invoice_line_items
            WHERE billing_record_id = $1
                AND item_type = $2
                AND detail->>'service_type' = $3
            RETURNING amount_usd_cents
        )
        SELECT COALESCE(SUM(amount_usd_cents), 0) FROM deleted
        "#,
    )
    .bind(billing_record_id)
    .bind(kind_str)
    .bind(service_type)
    .fetch_one(conn)
    .await
    .map_err(|e| {
        error!("Database error deleting service line items: {}", e);
        AppError::Database(format!("Failed to delete service line items: {}", e))
    })?;

    Ok(removed.0)
}

/// All line items on a record, oldest first
#[instrument(skip(conn))]
pub async fn list_line_items(
    conn: &mut PgConnection,
    billing_record_id: Uuid,
) -> AppResult<Vec<InvoiceLineItem>> {
    let rows = sqlx::query_as::<sqlx::Postgres, LineItemRow>(&format!(
        "SELECT {LINE_ITEM_COLUMNS} FROM invoice_line_items \
         WHERE billing_record_id = $1 ORDER BY created_at, id"
    ))
    .bind(billing_record_id)
    .fetch_all(conn)
    .await
    .map_err(|e| {
        error!("Database error listing line items: {}", e);
        AppError::Database(format!("Failed to list line items: {}", e))
    })?;

    Ok(rows.into_iter().map(Into::into).collect())
}

// ==================== Payments ====================

/// Record one successful settlement from one source
#[instrument(skip(conn, payment))]
pub async fn insert_payment(conn: &mut PgConnection, payment: &InvoicePayment) -> AppResult<()> {
    debug!(
        "Recording {} payment of {} cents for record {}",
        payment.source, payment.amount_usd_cents, payment.billing_record_id
    );

    sqlx::query(
        r#"
        INSERT INTO invoice_payments (
            id, billing_record_id, source, amount_usd_cents, reference_id
        )
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(payment.id)
    .bind(payment.billing_record_id)
    .bind(payment.source.to_string())
    .bind(payment.amount_usd_cents)
    .bind(&payment.reference_id)
    .execute(conn)
    .await
    .map_err(|e| {
        error!("Database error inserting invoice payment: {}", e);
        if e.to_string().contains("unique constraint") {
            AppError::Conflict(format!(
                "Payment {} from {} already recorded",
                payment.reference_id, payment.source
            ))
        } else {
            AppError::Database(format!("Failed to insert invoice payment: {}", e))
        }
    })?;

    Ok(())
}

/// All payments applied to a record, oldest first
#[instrument(skip(conn))]
pub async fn list_payments(
    conn: &mut PgConnection,
    billing_record_id: Uuid,
) -> AppResult<Vec<InvoicePayment>> {
    let rows = sqlx::query_as::<sqlx::Postgres, InvoicePaymentRow>(
        "SELECT id, billing_record_id, source, amount_usd_cents, reference_id, created_at \
         FROM invoice_payments WHERE billing_record_id = $1 ORDER BY created_at, id",
    )
    .bind(billing_record_id)
    .fetch_all(conn)
    .await
    .map_err(|e| {
        error!("Database error listing invoice payments: {}", e);
        AppError::Database(format!("Failed to list invoice payments: {}", e))
    })?;

    Ok(rows.into_iter().map(Into::into).collect())
}
