//! Payment method handlers

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use stratus_core::models::PaymentSource;
use stratus_core::AppError;
use stratus_db::repositories::customer_repo;
use stratus_db::CustomerLock;
use tracing::{info, instrument};
use validator::Validate;

use crate::context::ApiContext;
use crate::dto::{ApiResponse, AttachCardRequest, PaymentMethodResponse};

/// List the payment methods configured for a customer
///
/// GET /api/v1/customers/{id}/payment-methods
#[instrument(skip(ctx))]
pub async fn list_payment_methods(
    ctx: web::Data<ApiContext>,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let customer_id = path.into_inner();

    let mut conn = ctx
        .pool
        .acquire()
        .await
        .map_err(|e| AppError::Pool(e.to_string()))?;
    let customer = customer_repo::find_by_id(&mut conn, customer_id)
        .await?
        .ok_or(AppError::CustomerNotFound(customer_id))?;

    let methods: Vec<PaymentMethodResponse> = ctx
        .registry
        .infos_for(&customer)
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(HttpResponse::Ok().json(ApiResponse::success(methods)))
}

/// Attach a card payment method, creating the gateway customer on first use
///
/// POST /api/v1/customers/{id}/payment-methods
#[instrument(skip(ctx, req))]
pub async fn attach_card(
    ctx: web::Data<ApiContext>,
    path: web::Path<i64>,
    req: web::Json<AttachCardRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| AppError::Validation(e.to_string()))?;
    let customer_id = path.into_inner();

    let mut session =
        CustomerLock::acquire(&ctx.pool, customer_id, "attach_card", &ctx.billing).await?;

    let outcome = async {
        let customer = customer_repo::get_for_update(session.conn(), customer_id).await?;

        let gateway_customer_id = match customer.stripe_customer_id {
            Some(id) => id,
            None => ctx
                .card_gateway
                .create_customer(&customer.wallet_address)
                .await
                .map_err(|e| AppError::PaymentFailed {
                    reason: format!("failed to create gateway customer: {}", e.message),
                    retryable: e.retryable,
                })?,
        };

        customer_repo::attach_card(
            session.conn(),
            customer_id,
            &gateway_customer_id,
            &req.payment_method_id,
        )
        .await?;

        info!(customer_id, "Attached card payment method");
        Ok::<_, AppError>(())
    }
    .await;

    match outcome {
        Ok(()) => {
            session.commit().await?;
            Ok(HttpResponse::Created().json(ApiResponse::with_message((), "card attached")))
        }
        Err(e) => {
            let _ = session.rollback().await;
            Err(e)
        }
    }
}

/// Provider priority request body
#[derive(Debug, Deserialize, Validate)]
pub struct ProviderPriorityRequest {
    /// Provider sources in the order settlement should try them
    #[validate(length(min = 1))]
    pub priority: Vec<String>,
}

/// Replace the customer's payment-provider priority order
///
/// PUT /api/v1/customers/{id}/payment-methods/priority
#[instrument(skip(ctx, req))]
pub async fn set_priority(
    ctx: web::Data<ApiContext>,
    path: web::Path<i64>,
    req: web::Json<ProviderPriorityRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| AppError::Validation(e.to_string()))?;
    let customer_id = path.into_inner();

    let priority: Vec<PaymentSource> = req
        .priority
        .iter()
        .map(|s| {
            PaymentSource::from_str(s)
                .filter(PaymentSource::is_provider)
                .ok_or_else(|| AppError::InvalidInput(format!("Unknown provider '{}'", s)))
        })
        .collect::<Result<_, _>>()?;

    let mut session =
        CustomerLock::acquire(&ctx.pool, customer_id, "set_provider_priority", &ctx.billing)
            .await?;

    let outcome =
        customer_repo::set_provider_priority(session.conn(), customer_id, &priority).await;

    match outcome {
        Ok(()) => {
            session.commit().await?;
            Ok(HttpResponse::Ok().json(ApiResponse::with_message((), "priority updated")))
        }
        Err(e) => {
            let _ = session.rollback().await;
            Err(e)
        }
    }
}

/// Configure payment method routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route(
        "/customers/{customer_id}/payment-methods",
        web::get().to(list_payment_methods),
    )
    .route(
        "/customers/{customer_id}/payment-methods",
        web::post().to(attach_card),
    )
    .route(
        "/customers/{customer_id}/payment-methods/priority",
        web::put().to(set_priority),
    );
}
