//! Escrow mirror handlers
//!
//! Deposits and withdrawals are executed on-chain by the customer's wallet;
//! these endpoints mirror confirmed transactions into the billing ledger.
//! Amounts are decimal dollars, the chain's native unit.

use actix_web::{web, HttpResponse};
use rust_decimal::Decimal;
use serde::Deserialize;
use stratus_core::AppError;
use stratus_db::repositories::escrow_repo;
use stratus_db::CustomerLock;
use stratus_services::escrow_ops;
use tracing::instrument;
use validator::Validate;

use crate::context::ApiContext;
use crate::dto::{ApiResponse, PaginationParams};

/// Deposit/withdrawal mirror request body
#[derive(Debug, Deserialize, Validate)]
pub struct EscrowMirrorRequest {
    /// Amount in decimal dollars (chain-native unit)
    pub amount_usd: Decimal,
    /// Confirmed on-chain transaction digest
    #[validate(length(min = 1))]
    pub tx_digest: String,
}

/// Mirror a confirmed on-chain deposit
///
/// POST /api/v1/customers/{id}/escrow/deposits
#[instrument(skip(ctx, req))]
pub async fn record_deposit(
    ctx: web::Data<ApiContext>,
    path: web::Path<i64>,
    req: web::Json<EscrowMirrorRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| AppError::Validation(e.to_string()))?;
    let customer_id = path.into_inner();

    let mut session =
        CustomerLock::acquire(&ctx.pool, customer_id, "escrow_deposit", &ctx.billing).await?;

    let outcome =
        escrow_ops::record_deposit(&mut session, customer_id, req.amount_usd, &req.tx_digest)
            .await;

    match outcome {
        Ok(balance_cents) => {
            session.commit().await?;
            Ok(HttpResponse::Created().json(ApiResponse::success(serde_json::json!({
                "balance_usd_cents": balance_cents,
            }))))
        }
        Err(e) => {
            let _ = session.rollback().await;
            Err(e)
        }
    }
}

/// Mirror a confirmed on-chain withdrawal
///
/// POST /api/v1/customers/{id}/escrow/withdrawals
#[instrument(skip(ctx, req))]
pub async fn record_withdrawal(
    ctx: web::Data<ApiContext>,
    path: web::Path<i64>,
    req: web::Json<EscrowMirrorRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| AppError::Validation(e.to_string()))?;
    let customer_id = path.into_inner();

    let mut session =
        CustomerLock::acquire(&ctx.pool, customer_id, "escrow_withdrawal", &ctx.billing).await?;

    let outcome =
        escrow_ops::record_withdrawal(&mut session, customer_id, req.amount_usd, &req.tx_digest)
            .await;

    match outcome {
        Ok(balance_cents) => {
            session.commit().await?;
            Ok(HttpResponse::Created().json(ApiResponse::success(serde_json::json!({
                "balance_usd_cents": balance_cents,
            }))))
        }
        Err(e) => {
            let _ = session.rollback().await;
            Err(e)
        }
    }
}

/// List a customer's escrow transaction mirror, newest first
///
/// GET /api/v1/customers/{id}/escrow/transactions
#[instrument(skip(ctx))]
pub async fn list_transactions(
    ctx: web::Data<ApiContext>,
    path: web::Path<i64>,
    query: web::Query<PaginationParams>,
) -> Result<HttpResponse, AppError> {
    query.validate().map_err(|e| AppError::Validation(e.to_string()))?;
    let customer_id = path.into_inner();

    let mut conn = ctx
        .pool
        .acquire()
        .await
        .map_err(|e| AppError::Pool(e.to_string()))?;
    let transactions =
        escrow_repo::list_for_customer(&mut conn, customer_id, query.limit(), query.offset())
            .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(transactions)))
}

/// Configure escrow routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route(
        "/customers/{customer_id}/escrow/deposits",
        web::post().to(record_deposit),
    )
    .route(
        "/customers/{customer_id}/escrow/withdrawals",
        web::post().to(record_withdrawal),
    )
    .route(
        "/customers/{customer_id}/escrow/transactions",
        web::get().to(list_transactions),
    );
}
