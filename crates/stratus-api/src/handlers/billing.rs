//! Billing record handlers
//!
//! Read paths run on plain pool connections; anything that can write opens
//! a customer-lock session and commits or rolls back before responding.

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use stratus_core::models::BillingStatus;
use stratus_core::AppError;
use stratus_db::repositories::{credit_repo, invoice_repo};
use stratus_db::CustomerLock;
use stratus_services::{billing_job, credits, invoices};
use tracing::{instrument, warn};
use validator::Validate;

use crate::context::ApiContext;
use crate::dto::{
    ApiResponse, BillingFilterParams, BillingRecordResponse, BillingRunResponse, DraftResponse,
    LineItemResponse, PaginationParams,
};

/// List a customer's billing records
///
/// GET /api/v1/customers/{id}/invoices
#[instrument(skip(ctx))]
pub async fn list_invoices(
    ctx: web::Data<ApiContext>,
    path: web::Path<i64>,
    query: web::Query<PaginationParams>,
    filters: web::Query<BillingFilterParams>,
) -> Result<HttpResponse, AppError> {
    query.validate().map_err(|e| {
        warn!("Pagination validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let customer_id = path.into_inner();
    let status = match filters.status.as_deref() {
        Some(s) => Some(
            BillingStatus::from_str(s)
                .ok_or_else(|| AppError::InvalidInput(format!("Unknown status '{}'", s)))?,
        ),
        None => None,
    };

    let mut conn = ctx
        .pool
        .acquire()
        .await
        .map_err(|e| AppError::Pool(e.to_string()))?;
    let (records, total) = invoice_repo::list_for_customer(
        &mut conn,
        customer_id,
        status,
        query.limit(),
        query.offset(),
    )
    .await?;

    let data: Vec<BillingRecordResponse> = records.into_iter().map(Into::into).collect();
    Ok(HttpResponse::Ok().json(query.paginate(data, total)))
}

/// Get (or create) the customer's DRAFT invoice with its line items
///
/// GET /api/v1/customers/{id}/invoices/draft
#[instrument(skip(ctx))]
pub async fn get_draft(
    ctx: web::Data<ApiContext>,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let customer_id = path.into_inner();

    let mut session =
        CustomerLock::acquire(&ctx.pool, customer_id, "get_draft", &ctx.billing).await?;

    let outcome = async {
        let draft = invoices::get_or_create_draft(&mut session, customer_id)
            .await?;
        let items = invoice_repo::list_line_items(session.conn(), draft.id).await?;
        Ok::<_, AppError>(DraftResponse {
            record: draft.into(),
            line_items: items.into_iter().map(LineItemResponse::from).collect(),
        })
    }
    .await;

    match outcome {
        Ok(resp) => {
            session.commit().await?;
            Ok(HttpResponse::Ok().json(ApiResponse::success(resp)))
        }
        Err(e) => {
            let _ = session.rollback().await;
            Err(e)
        }
    }
}

/// Get one billing record with its line items and payments
///
/// GET /api/v1/customers/{id}/invoices/{invoice_id}
#[instrument(skip(ctx))]
pub async fn get_invoice(
    ctx: web::Data<ApiContext>,
    path: web::Path<(i64, uuid::Uuid)>,
) -> Result<HttpResponse, AppError> {
    let (customer_id, invoice_id) = path.into_inner();

    let mut conn = ctx
        .pool
        .acquire()
        .await
        .map_err(|e| AppError::Pool(e.to_string()))?;

    let record = invoice_repo::find_by_id(&mut conn, invoice_id)
        .await?
        .filter(|r| r.customer_id == customer_id)
        .ok_or_else(|| AppError::InvoiceNotFound(invoice_id.to_string()))?;
    let items = invoice_repo::list_line_items(&mut conn, invoice_id).await?;
    let payments = invoice_repo::list_payments(&mut conn, invoice_id).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({
        "record": BillingRecordResponse::from(record),
        "line_items": items.into_iter().map(LineItemResponse::from).collect::<Vec<_>>(),
        "payments": payments.into_iter().map(crate::dto::PaymentResponse::from).collect::<Vec<_>>(),
    }))))
}

/// Credit grant request body
#[derive(Debug, Deserialize, Validate)]
pub struct GrantCreditRequest {
    #[validate(range(min = 1))]
    pub amount_usd_cents: i64,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    #[validate(length(min = 1))]
    pub reason: String,
}

/// Grant a credit to a customer
///
/// POST /api/v1/customers/{id}/credits
#[instrument(skip(ctx, req))]
pub async fn grant_credit(
    ctx: web::Data<ApiContext>,
    path: web::Path<i64>,
    req: web::Json<GrantCreditRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| AppError::Validation(e.to_string()))?;
    let customer_id = path.into_inner();

    let mut session =
        CustomerLock::acquire(&ctx.pool, customer_id, "grant_credit", &ctx.billing).await?;

    let outcome = credits::grant_credit(
        &mut session,
        customer_id,
        req.amount_usd_cents,
        req.expires_at,
        &req.reason,
    )
    .await;

    match outcome {
        Ok(credit) => {
            session.commit().await?;
            Ok(HttpResponse::Created().json(ApiResponse::success(credit)))
        }
        Err(e) => {
            let _ = session.rollback().await;
            Err(e)
        }
    }
}

/// List a customer's credits
///
/// GET /api/v1/customers/{id}/credits
#[instrument(skip(ctx))]
pub async fn list_credits(
    ctx: web::Data<ApiContext>,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let customer_id = path.into_inner();

    let mut conn = ctx
        .pool
        .acquire()
        .await
        .map_err(|e| AppError::Pool(e.to_string()))?;
    let credits = credit_repo::list_for_customer(&mut conn, customer_id).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(credits)))
}

/// Trigger the periodic billing job for one customer
///
/// POST /api/v1/customers/{id}/billing/run
#[instrument(skip(ctx))]
pub async fn run_billing(
    ctx: web::Data<ApiContext>,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let customer_id = path.into_inner();

    let deps = billing_job::BillingJobDeps {
        registry: &ctx.registry,
        usage_source: ctx.usage_source.as_ref(),
        clock: ctx.clock.as_ref(),
        config: &ctx.billing,
    };

    let report = billing_job::run_billing_for_customer(&ctx.pool, customer_id, &deps).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(BillingRunResponse {
        customer_id: report.customer_id,
        cycles_processed: report.cycles_processed,
        retries_attempted: report.retries_attempted,
        retries_succeeded: report.retries_succeeded,
    })))
}

/// Configure billing routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route(
        "/customers/{customer_id}/invoices",
        web::get().to(list_invoices),
    )
    .route(
        "/customers/{customer_id}/invoices/draft",
        web::get().to(get_draft),
    )
    .route(
        "/customers/{customer_id}/invoices/{invoice_id}",
        web::get().to(get_invoice),
    )
    .route(
        "/customers/{customer_id}/credits",
        web::get().to(list_credits),
    )
    .route(
        "/customers/{customer_id}/credits",
        web::post().to(grant_credit),
    )
    .route(
        "/customers/{customer_id}/billing/run",
        web::post().to(run_billing),
    );
}
