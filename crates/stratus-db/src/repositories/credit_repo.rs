//! Customer credit repository

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use stratus_core::models::CustomerCredit;
use stratus_core::{AppError, AppResult};
use tracing::{debug, error, instrument};
use uuid::Uuid;

const CREDIT_COLUMNS: &str = "id, customer_id, original_amount_usd_cents, \
     remaining_amount_usd_cents, expires_at, reason, created_at, updated_at";

/// Active (unexpired, non-empty) credits in application order:
/// soonest-expiring first, non-expiring last, oldest first within a group.
/// Rows are locked for the rest of the transaction.
#[instrument(skip(conn))]
pub async fn list_active_for_update(
    conn: &mut PgConnection,
    customer_id: i64,
    now: DateTime<Utc>,
) -> AppResult<Vec<CustomerCredit>> {
    let rows = sqlx::query_as::<sqlx::Postgres, crate::rows::CreditRow>(&format!(
        r#"
        SELECT {CREDIT_COLUMNS} FROM customer_credits
        WHERE customer_id = $1
            AND remaining_amount_usd_cents > 0
            AND (expires_at IS NULL OR expires_at > $2)
        ORDER BY expires_at ASC NULLS LAST, created_at ASC
        FOR UPDATE
        "#
    ))
    .bind(customer_id)
    .bind(now)
    .fetch_all(conn)
    .await
    .map_err(|e| {
        error!("Database error listing active credits: {}", e);
        AppError::Database(format!("Failed to list active credits: {}", e))
    })?;

    Ok(rows.into_iter().map(Into::into).collect())
}

/// Persist the remainder of a partially or fully consumed credit
#[instrument(skip(conn))]
pub async fn set_remaining(
    conn: &mut PgConnection,
    credit_id: Uuid,
    remaining_usd_cents: i64,
) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE customer_credits
        SET remaining_amount_usd_cents = $2,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(credit_id)
    .bind(remaining_usd_cents)
    .execute(conn)
    .await
    .map_err(|e| {
        error!("Database error updating credit {}: {}", credit_id, e);
        AppError::Database(format!("Failed to update credit: {}", e))
    })?;

    Ok(())
}

/// Grant a credit
#[instrument(skip(conn, credit))]
pub async fn insert(conn: &mut PgConnection, credit: &CustomerCredit) -> AppResult<()> {
    debug!(
        "Granting credit of {} cents to customer {}",
        credit.original_amount_usd_cents, credit.customer_id
    );

    sqlx::query(
        r#"
        INSERT INTO customer_credits (
            id, customer_id, original_amount_usd_cents,
            remaining_amount_usd_cents, expires_at, reason
        )
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(credit.id)
    .bind(credit.customer_id)
    .bind(credit.original_amount_usd_cents)
    .bind(credit.remaining_amount_usd_cents)
    .bind(credit.expires_at)
    .bind(&credit.reason)
    .execute(conn)
    .await
    .map_err(|e| {
        error!("Database error granting credit: {}", e);
        AppError::Database(format!("Failed to grant credit: {}", e))
    })?;

    Ok(())
}

/// All credits for a customer, newest first (read path)
#[instrument(skip(conn))]
pub async fn list_for_customer(
    conn: &mut PgConnection,
    customer_id: i64,
) -> AppResult<Vec<CustomerCredit>> {
    let rows = sqlx::query_as::<sqlx::Postgres, crate::rows::CreditRow>(&format!(
        "SELECT {CREDIT_COLUMNS} FROM customer_credits \
         WHERE customer_id = $1 ORDER BY created_at DESC"
    ))
    .bind(customer_id)
    .fetch_all(conn)
    .await
    .map_err(|e| {
        error!("Database error listing credits: {}", e);
        AppError::Database(format!("Failed to list credits: {}", e))
    })?;

    Ok(rows.into_iter().map(Into::into).collect())
}
