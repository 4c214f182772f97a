//! Service subscription handlers
//!
//! Every mutation here is one tier-engine operation inside one customer
//! lock session.

use actix_web::{web, HttpResponse};
use stratus_core::models::{ServiceType, Tier};
use stratus_core::AppError;
use stratus_db::repositories::service_repo;
use stratus_db::{CustomerLock, LockedCustomer};
use stratus_services::tiers::{self, TierChangeResult};
use stratus_services::SettlementOutcome;
use tracing::instrument;
use validator::Validate;

use crate::context::ApiContext;
use crate::dto::{ApiResponse, ServiceInstanceResponse, TierChangeResponse, TierRequest};

fn parse_service(s: &str) -> Result<ServiceType, AppError> {
    ServiceType::from_str(s)
        .ok_or_else(|| AppError::InvalidInput(format!("Unknown service type '{}'", s)))
}

fn parse_tier(s: &str) -> Result<Tier, AppError> {
    Tier::from_str(s).ok_or_else(|| AppError::InvalidInput(format!("Unknown tier '{}'", s)))
}

fn tier_change_response(result: TierChangeResult) -> TierChangeResponse {
    let (failure_reason, payment_action_url) = match result.settlement.as_ref().map(|s| &s.outcome)
    {
        Some(SettlementOutcome::Failed {
            reason, action_url, ..
        }) => (Some(reason.clone()), action_url.clone()),
        _ => (None, None),
    };
    TierChangeResponse {
        payment_pending: result.payment_pending(),
        failure_reason,
        payment_action_url,
        service: result.service.into(),
    }
}

/// Commit on success, roll back on error
async fn finish(
    session: LockedCustomer,
    outcome: Result<TierChangeResult, AppError>,
) -> Result<HttpResponse, AppError> {
    match outcome {
        Ok(result) => {
            session.commit().await?;
            Ok(HttpResponse::Ok().json(ApiResponse::success(tier_change_response(result))))
        }
        Err(e) => {
            let _ = session.rollback().await;
            Err(e)
        }
    }
}

/// List a customer's service instances
///
/// GET /api/v1/customers/{id}/services
#[instrument(skip(ctx))]
pub async fn list_services(
    ctx: web::Data<ApiContext>,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let customer_id = path.into_inner();

    let mut conn = ctx
        .pool
        .acquire()
        .await
        .map_err(|e| AppError::Pool(e.to_string()))?;
    let services = service_repo::list_for_customer(&mut conn, customer_id).await?;

    let data: Vec<ServiceInstanceResponse> = services.into_iter().map(Into::into).collect();
    Ok(HttpResponse::Ok().json(ApiResponse::success(data)))
}

/// Subscribe to a service at a tier
///
/// POST /api/v1/customers/{id}/services/{service}/subscribe
#[instrument(skip(ctx, req))]
pub async fn subscribe(
    ctx: web::Data<ApiContext>,
    path: web::Path<(i64, String)>,
    req: web::Json<TierRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| AppError::Validation(e.to_string()))?;
    let (customer_id, service) = path.into_inner();
    let service = parse_service(&service)?;
    let tier = parse_tier(&req.tier)?;

    let mut session =
        CustomerLock::acquire(&ctx.pool, customer_id, "subscribe", &ctx.billing).await?;
    let outcome = tiers::subscribe(
        &mut session,
        service,
        tier,
        &ctx.registry,
        ctx.clock.as_ref(),
    )
    .await;
    finish(session, outcome).await
}

/// Immediate, pro-rated tier upgrade
///
/// POST /api/v1/customers/{id}/services/{service}/upgrade
#[instrument(skip(ctx, req))]
pub async fn upgrade(
    ctx: web::Data<ApiContext>,
    path: web::Path<(i64, String)>,
    req: web::Json<TierRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| AppError::Validation(e.to_string()))?;
    let (customer_id, service) = path.into_inner();
    let service = parse_service(&service)?;
    let tier = parse_tier(&req.tier)?;

    let mut session =
        CustomerLock::acquire(&ctx.pool, customer_id, "tier_upgrade", &ctx.billing).await?;
    let outcome = tiers::handle_tier_upgrade(
        &mut session,
        service,
        tier,
        &ctx.registry,
        ctx.clock.as_ref(),
    )
    .await;
    finish(session, outcome).await
}

/// Schedule an end-of-period downgrade
///
/// POST /api/v1/customers/{id}/services/{service}/downgrade
#[instrument(skip(ctx, req))]
pub async fn downgrade(
    ctx: web::Data<ApiContext>,
    path: web::Path<(i64, String)>,
    req: web::Json<TierRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| AppError::Validation(e.to_string()))?;
    let (customer_id, service) = path.into_inner();
    let service = parse_service(&service)?;
    let tier = parse_tier(&req.tier)?;

    let mut session =
        CustomerLock::acquire(&ctx.pool, customer_id, "tier_downgrade", &ctx.billing).await?;
    let outcome =
        tiers::schedule_tier_downgrade(&mut session, service, tier, ctx.clock.as_ref()).await;
    finish(session, outcome).await
}

/// Schedule an end-of-period cancellation
///
/// POST /api/v1/customers/{id}/services/{service}/cancel
#[instrument(skip(ctx))]
pub async fn cancel(
    ctx: web::Data<ApiContext>,
    path: web::Path<(i64, String)>,
) -> Result<HttpResponse, AppError> {
    let (customer_id, service) = path.into_inner();
    let service = parse_service(&service)?;

    let mut session =
        CustomerLock::acquire(&ctx.pool, customer_id, "cancellation", &ctx.billing).await?;
    let outcome = tiers::schedule_cancellation(&mut session, service, ctx.clock.as_ref()).await;
    finish(session, outcome).await
}

/// Undo a scheduled cancellation
///
/// POST /api/v1/customers/{id}/services/{service}/undo-cancel
#[instrument(skip(ctx))]
pub async fn undo_cancel(
    ctx: web::Data<ApiContext>,
    path: web::Path<(i64, String)>,
) -> Result<HttpResponse, AppError> {
    let (customer_id, service) = path.into_inner();
    let service = parse_service(&service)?;

    let mut session =
        CustomerLock::acquire(&ctx.pool, customer_id, "undo_cancellation", &ctx.billing).await?;
    let outcome = tiers::undo_cancellation(&mut session, service).await;
    finish(session, outcome).await
}

/// Clear a scheduled tier change without changing the tier
///
/// POST /api/v1/customers/{id}/services/{service}/cancel-scheduled
#[instrument(skip(ctx))]
pub async fn cancel_scheduled(
    ctx: web::Data<ApiContext>,
    path: web::Path<(i64, String)>,
) -> Result<HttpResponse, AppError> {
    let (customer_id, service) = path.into_inner();
    let service = parse_service(&service)?;

    let mut session =
        CustomerLock::acquire(&ctx.pool, customer_id, "cancel_scheduled_change", &ctx.billing)
            .await?;
    let outcome = tiers::cancel_scheduled_tier_change(&mut session, service).await;
    finish(session, outcome).await
}

/// Retry the unpaid subscription charge blocking a service
///
/// POST /api/v1/customers/{id}/services/{service}/retry-payment
#[instrument(skip(ctx))]
pub async fn retry_payment(
    ctx: web::Data<ApiContext>,
    path: web::Path<(i64, String)>,
) -> Result<HttpResponse, AppError> {
    let (customer_id, service) = path.into_inner();
    let service = parse_service(&service)?;

    let mut session =
        CustomerLock::acquire(&ctx.pool, customer_id, "retry_subscription", &ctx.billing).await?;
    let outcome = tiers::retry_subscription_payment(
        &mut session,
        service,
        &ctx.registry,
        ctx.clock.as_ref(),
    )
    .await;
    finish(session, outcome).await
}

/// Configure service subscription routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route(
        "/customers/{customer_id}/services",
        web::get().to(list_services),
    )
    .route(
        "/customers/{customer_id}/services/{service}/subscribe",
        web::post().to(subscribe),
    )
    .route(
        "/customers/{customer_id}/services/{service}/upgrade",
        web::post().to(upgrade),
    )
    .route(
        "/customers/{customer_id}/services/{service}/downgrade",
        web::post().to(downgrade),
    )
    .route(
        "/customers/{customer_id}/services/{service}/cancel",
        web::post().to(cancel),
    )
    .route(
        "/customers/{customer_id}/services/{service}/undo-cancel",
        web::post().to(undo_cancel),
    )
    .route(
        "/customers/{customer_id}/services/{service}/cancel-scheduled",
        web::post().to(cancel_scheduled),
    )
    .route(
        "/customers/{customer_id}/services/{service}/retry-payment",
        web::post().to(retry_payment),
    );
}
