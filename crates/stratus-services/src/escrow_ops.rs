//! Escrow account operations
//!
//! Mirrors customer-initiated on-chain deposits and withdrawals into the
//! ledger: one append-only `escrow_transactions` row (decimal dollars, the
//! chain's unit) plus the matching adjustment of the customer's mirrored
//! cent balance. Charges are mirrored by settlement, not here.

use chrono::Utc;
use rust_decimal::Decimal;
use stratus_core::models::{dollars_to_cents, EscrowOperation, EscrowTransaction};
use stratus_core::{AppError, AppResult};
use stratus_db::repositories::{customer_repo, escrow_repo};
use stratus_db::LockedCustomer;
use tracing::{info, instrument};
use uuid::Uuid;

/// Mirror an on-chain deposit: append the transaction and credit the
/// mirrored balance. Returns the new balance in cents.
#[instrument(skip(session))]
pub async fn record_deposit(
    session: &mut LockedCustomer,
    customer_id: i64,
    amount_usd: Decimal,
    tx_digest: &str,
) -> AppResult<i64> {
    if amount_usd <= Decimal::ZERO {
        return Err(AppError::InvalidInput(
            "deposit amount must be positive".to_string(),
        ));
    }

    // Pin the row so the balance adjustment is serialized with settlement.
    customer_repo::get_for_update(session.conn(), customer_id).await?;

    let mirror = EscrowTransaction {
        id: Uuid::new_v4(),
        customer_id,
        operation: EscrowOperation::Deposit,
        amount_usd,
        tx_digest: tx_digest.to_string(),
        billing_record_id: None,
        created_at: Utc::now(),
    };
    escrow_repo::insert(session.conn(), &mirror).await?;

    let new_balance =
        customer_repo::adjust_balance(session.conn(), customer_id, dollars_to_cents(amount_usd))
            .await?;

    info!(
        customer_id,
        %amount_usd,
        new_balance_cents = new_balance,
        "Mirrored escrow deposit"
    );

    Ok(new_balance)
}

/// Mirror an on-chain withdrawal: append the transaction and debit the
/// mirrored balance. Fails when the mirrored balance cannot cover it.
#[instrument(skip(session))]
pub async fn record_withdrawal(
    session: &mut LockedCustomer,
    customer_id: i64,
    amount_usd: Decimal,
    tx_digest: &str,
) -> AppResult<i64> {
    if amount_usd <= Decimal::ZERO {
        return Err(AppError::InvalidInput(
            "withdrawal amount must be positive".to_string(),
        ));
    }

    let customer = customer_repo::get_for_update(session.conn(), customer_id).await?;
    let amount_cents = dollars_to_cents(amount_usd);

    if !customer.escrow_covers(amount_cents) {
        return Err(AppError::InsufficientBalance {
            required_cents: amount_cents,
            available_cents: customer.balance_usd_cents,
        });
    }

    let mirror = EscrowTransaction {
        id: Uuid::new_v4(),
        customer_id,
        operation: EscrowOperation::Withdraw,
        amount_usd,
        tx_digest: tx_digest.to_string(),
        billing_record_id: None,
        created_at: Utc::now(),
    };
    escrow_repo::insert(session.conn(), &mirror).await?;

    let new_balance =
        customer_repo::adjust_balance(session.conn(), customer_id, -amount_cents).await?;

    info!(
        customer_id,
        %amount_usd,
        new_balance_cents = new_balance,
        "Mirrored escrow withdrawal"
    );

    Ok(new_balance)
}
