//! Customer repository
//!
//! PostgreSQL-backed storage for customer rows, including the row-lock read
//! used at the start of every billing mutation.

use chrono::NaiveDate;
use sqlx::PgConnection;
use stratus_core::models::{Customer, PaymentSource};
use stratus_core::{AppError, AppResult};
use tracing::{debug, error, instrument};

use crate::rows::{CustomerRow, CUSTOMER_COLUMNS};

/// Find a customer by id
#[instrument(skip(conn))]
pub async fn find_by_id(conn: &mut PgConnection, id: i64) -> AppResult<Option<Customer>> {
    debug!("Finding customer by id: {}", id);

    let result = sqlx::query_as::<sqlx::Postgres, CustomerRow>(&format!(
        "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await
    .map_err(|e| {
        error!("Database error finding customer {}: {}", id, e);
        AppError::Database(format!("Failed to find customer: {}", e))
    })?;

    Ok(result.map(Into::into))
}

/// Find a customer by wallet address
#[instrument(skip(conn))]
pub async fn find_by_wallet(
    conn: &mut PgConnection,
    wallet_address: &str,
) -> AppResult<Option<Customer>> {
    debug!("Finding customer by wallet: {}", wallet_address);

    let result = sqlx::query_as::<sqlx::Postgres, CustomerRow>(&format!(
        "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE wallet_address = $1"
    ))
    .bind(wallet_address)
    .fetch_optional(conn)
    .await
    .map_err(|e| {
        error!("Database error finding customer by wallet: {}", e);
        AppError::Database(format!("Failed to find customer: {}", e))
    })?;

    Ok(result.map(Into::into))
}

/// Load a customer row with `FOR UPDATE`, failing if it does not exist.
///
/// Every billing mutation starts with this read so the row is pinned for
/// the rest of the locked transaction.
#[instrument(skip(conn))]
pub async fn get_for_update(conn: &mut PgConnection, id: i64) -> AppResult<Customer> {
    let row = sqlx::query_as::<sqlx::Postgres, CustomerRow>(&format!(
        "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await
    .map_err(|e| {
        error!("Failed to lock customer row {}: {}", id, e);
        AppError::Database(format!("Failed to lock customer row: {}", e))
    })?
    .ok_or(AppError::CustomerNotFound(id))?;

    Ok(row.into())
}

/// Create a customer
#[instrument(skip(conn))]
pub async fn create(
    conn: &mut PgConnection,
    wallet_address: &str,
    escrow_object_id: Option<&str>,
    billing_period_start: NaiveDate,
) -> AppResult<Customer> {
    debug!("Creating customer for wallet {}", wallet_address);

    let row = sqlx::query_as::<sqlx::Postgres, CustomerRow>(&format!(
        r#"
        INSERT INTO customers (wallet_address, escrow_object_id, billing_period_start)
        VALUES ($1, $2, $3)
        RETURNING {CUSTOMER_COLUMNS}
        "#
    ))
    .bind(wallet_address)
    .bind(escrow_object_id)
    .bind(billing_period_start)
    .fetch_one(conn)
    .await
    .map_err(|e| {
        error!("Database error creating customer: {}", e);
        if e.to_string().contains("unique constraint") {
            AppError::AlreadyExists(format!("Customer {} already exists", wallet_address))
        } else {
            AppError::Database(format!("Failed to create customer: {}", e))
        }
    })?;

    Ok(row.into())
}

/// Adjust the mirrored escrow balance by `delta_cents`, returning the new balance
#[instrument(skip(conn))]
pub async fn adjust_balance(
    conn: &mut PgConnection,
    id: i64,
    delta_cents: i64,
) -> AppResult<i64> {
    let result: (i64,) = sqlx::query_as(
        r#"
        UPDATE customers
        SET balance_usd_cents = balance_usd_cents + $2,
            updated_at = NOW()
        WHERE id = $1
        RETURNING balance_usd_cents
        "#,
    )
    .bind(id)
    .bind(delta_cents)
    .fetch_one(conn)
    .await
    .map_err(|e| {
        error!("Database error adjusting balance for customer {}: {}", id, e);
        AppError::Database(format!("Failed to adjust balance: {}", e))
    })?;

    Ok(result.0)
}

/// Advance the customer's billing period start to `new_start`
#[instrument(skip(conn))]
pub async fn set_billing_period_start(
    conn: &mut PgConnection,
    id: i64,
    new_start: NaiveDate,
) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE customers
        SET billing_period_start = $2,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(new_start)
    .execute(conn)
    .await
    .map_err(|e| {
        error!("Database error advancing billing period: {}", e);
        AppError::Database(format!("Failed to advance billing period: {}", e))
    })?;

    Ok(())
}

/// Attach a card payment method
#[instrument(skip(conn, stripe_customer_id, payment_method_id))]
pub async fn attach_card(
    conn: &mut PgConnection,
    id: i64,
    stripe_customer_id: &str,
    payment_method_id: &str,
) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE customers
        SET stripe_customer_id = $2,
            card_payment_method_id = $3,
            card_active = TRUE,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(stripe_customer_id)
    .bind(payment_method_id)
    .execute(conn)
    .await
    .map_err(|e| {
        error!("Database error attaching card for customer {}: {}", id, e);
        AppError::Database(format!("Failed to attach card: {}", e))
    })?;

    Ok(())
}

/// Replace the customer's payment-provider priority order
#[instrument(skip(conn))]
pub async fn set_provider_priority(
    conn: &mut PgConnection,
    id: i64,
    priority: &[PaymentSource],
) -> AppResult<()> {
    let values: Vec<String> = priority.iter().map(ToString::to_string).collect();

    sqlx::query(
        r#"
        UPDATE customers
        SET provider_priority = $2,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(&values)
    .execute(conn)
    .await
    .map_err(|e| {
        error!("Database error setting provider priority: {}", e);
        AppError::Database(format!("Failed to set provider priority: {}", e))
    })?;

    Ok(())
}

/// Customers whose billing boundary is at or before `today` — candidates for
/// the periodic billing job.
#[instrument(skip(conn))]
pub async fn ids_due_for_billing(
    conn: &mut PgConnection,
    today: NaiveDate,
    limit: i64,
) -> AppResult<Vec<i64>> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        r#"
        SELECT id FROM customers
        WHERE billing_period_start <= $1
        ORDER BY billing_period_start
        LIMIT $2
        "#,
    )
    .bind(today)
    .bind(limit)
    .fetch_all(conn)
    .await
    .map_err(|e| {
        error!("Database error listing due customers: {}", e);
        AppError::Database(format!("Failed to list due customers: {}", e))
    })?;

    Ok(rows.into_iter().map(|r| r.0).collect())
}
