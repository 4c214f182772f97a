//! Escrow transaction repository
//!
//! Append-only mirror of on-chain operations. Amounts here are decimal
//! dollars (chain-native), not cents.

use sqlx::PgConnection;
use stratus_core::models::EscrowTransaction;
use stratus_core::{AppError, AppResult};
use tracing::{debug, error, instrument};

const ESCROW_COLUMNS: &str =
    "id, customer_id, operation, amount_usd, tx_digest, billing_record_id, created_at";

/// Append an escrow transaction mirror row
#[instrument(skip(conn, tx))]
pub async fn insert(conn: &mut PgConnection, tx: &EscrowTransaction) -> AppResult<()> {
    debug!(
        "Mirroring escrow {} of ${} for customer {}",
        tx.operation, tx.amount_usd, tx.customer_id
    );

    sqlx::query(
        r#"
        INSERT INTO escrow_transactions (
            id, customer_id, operation, amount_usd, tx_digest, billing_record_id
        )
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(tx.id)
    .bind(tx.customer_id)
    .bind(tx.operation.to_string())
    .bind(tx.amount_usd)
    .bind(&tx.tx_digest)
    .bind(tx.billing_record_id)
    .execute(conn)
    .await
    .map_err(|e| {
        error!("Database error inserting escrow transaction: {}", e);
        AppError::Database(format!("Failed to insert escrow transaction: {}", e))
    })?;

    Ok(())
}

/// A customer's escrow history, newest first
#[instrument(skip(conn))]
pub async fn list_for_customer(
    conn: &mut PgConnection,
    customer_id: i64,
    limit: i64,
    offset: i64,
) -> AppResult<Vec<EscrowTransaction>> {
    let rows = sqlx::query_as::<sqlx::Postgres, crate::rows::EscrowTransactionRow>(&format!(
        "SELECT {ESCROW_COLUMNS} FROM escrow_transactions \
         WHERE customer_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3"
    ))
    .bind(customer_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(conn)
    .await
    .map_err(|e| {
        error!("Database error listing escrow transactions: {}", e);
        AppError::Database(format!("Failed to list escrow transactions: {}", e))
    })?;

    Ok(rows.into_iter().map(Into::into).collect())
}
