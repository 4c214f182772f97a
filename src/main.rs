//! Stratus Billing Control Plane Server
//!
//! Bootstraps the billing engine: configuration, database pool, payment
//! provider registry, the HTTP API, and the hourly periodic billing loop.

use actix_cors::Cors;
use actix_web::{http::header, middleware, web, App, HttpResponse, HttpServer};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use stratus_api::{
    configure_billing, configure_escrow, configure_payment_methods, configure_services, ApiContext,
};
use stratus_core::AppConfig;
use stratus_db::{create_pool, PgUsageSource};
use stratus_providers::{
    CardGateway, CardProvider, ChainAccount, ChainError, ChainReceipt, EscrowBackend,
    EscrowProvider, GatewayCharge, GatewayError, PaypalProvider, ProviderRegistry,
};
use stratus_services::{billing_job, SystemClock};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Deployment seam for the on-chain escrow client. The concrete chain RPC
/// integration is wired here; until it is, charges report a transient
/// failure and settlement falls through to the next provider.
struct UnwiredEscrowBackend;

#[async_trait]
impl EscrowBackend for UnwiredEscrowBackend {
    async fn charge(
        &self,
        _escrow_object_id: &str,
        _amount_usd: Decimal,
    ) -> Result<ChainReceipt, ChainError> {
        Err(ChainError {
            message: "escrow backend not wired".to_string(),
            retryable: true,
        })
    }

    async fn deposit(
        &self,
        _escrow_object_id: &str,
        _amount_usd: Decimal,
    ) -> Result<ChainReceipt, ChainError> {
        Err(ChainError {
            message: "escrow backend not wired".to_string(),
            retryable: true,
        })
    }

    async fn withdraw(
        &self,
        _escrow_object_id: &str,
        _amount_usd: Decimal,
    ) -> Result<ChainReceipt, ChainError> {
        Err(ChainError {
            message: "escrow backend not wired".to_string(),
            retryable: true,
        })
    }

    async fn get_account(&self, _escrow_object_id: &str) -> Result<ChainAccount, ChainError> {
        Err(ChainError {
            message: "escrow backend not wired".to_string(),
            retryable: true,
        })
    }
}

/// Deployment seam for the card processor client.
struct UnwiredCardGateway;

#[async_trait]
impl CardGateway for UnwiredCardGateway {
    async fn charge(
        &self,
        _gateway_customer_id: &str,
        _payment_method_id: &str,
        _amount_usd_cents: i64,
        _description: &str,
    ) -> Result<GatewayCharge, GatewayError> {
        Err(GatewayError {
            message: "card gateway not wired".to_string(),
            retryable: true,
        })
    }

    async fn create_customer(&self, _wallet_address: &str) -> Result<String, GatewayError> {
        Err(GatewayError {
            message: "card gateway not wired".to_string(),
            retryable: true,
        })
    }
}

/// Health check endpoint
async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "stratus-billing",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Configure API routes
fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/health", web::get().to(health_check))
            .configure(configure_billing)
            .configure(configure_services)
            .configure(configure_payment_methods)
            .configure(configure_escrow),
    );
}

/// Initialize tracing/logging
fn init_tracing() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "stratus_billing={},stratus_api={},stratus_services={},stratus_db={},actix_web=info,sqlx=warn",
            log_level, log_level, log_level, log_level
        ))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .init();
}

/// Seconds between periodic billing batches
const BILLING_LOOP_INTERVAL_SECS: u64 = 3600;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_tracing();

    info!(
        "Starting Stratus Billing control plane v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = AppConfig::load().expect("Failed to load configuration");

    info!("Connecting to database...");
    let pool = create_pool(&config.database.url, Some(config.database.max_connections))
        .await
        .expect("Failed to create database pool");

    // Payment providers. The escrow and card backends are deployment seams;
    // the registry and settlement logic are identical once they are wired.
    let card_gateway = Arc::new(UnwiredCardGateway);
    let registry = ProviderRegistry::new(vec![
        Arc::new(EscrowProvider::new(Arc::new(UnwiredEscrowBackend))),
        Arc::new(CardProvider::new(card_gateway.clone())),
        Arc::new(PaypalProvider::new()),
    ]);

    let usage_source = Arc::new(PgUsageSource::new(pool.clone()));
    let clock = Arc::new(SystemClock);

    let context = web::Data::new(ApiContext::new(
        pool.clone(),
        registry.clone(),
        usage_source.clone(),
        clock.clone(),
        card_gateway,
        config.billing.clone(),
    ));

    // Periodic billing loop: month-end rollovers and automatic retries.
    {
        let pool = pool.clone();
        let registry = registry.clone();
        let usage_source = usage_source.clone();
        let billing_config = config.billing.clone();
        tokio::spawn(async move {
            let clock = SystemClock;
            let mut ticker =
                tokio::time::interval(Duration::from_secs(BILLING_LOOP_INTERVAL_SECS));
            loop {
                ticker.tick().await;
                let deps = billing_job::BillingJobDeps {
                    registry: &registry,
                    usage_source: usage_source.as_ref(),
                    clock: &clock,
                    config: &billing_config,
                };
                match billing_job::run_billing_batch(&pool, &deps).await {
                    Ok(reports) => {
                        if !reports.is_empty() {
                            info!("Periodic billing batch processed {} customers", reports.len());
                        }
                    }
                    Err(e) => warn!("Periodic billing batch failed: {}", e),
                }
            }
        });
    }

    let bind_addr = config.server_addr();
    let workers = config.server.workers;
    info!(
        "Starting HTTP server on {} with {} workers",
        bind_addr, workers
    );

    let cors_origins = env::var("CORS_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string());

    HttpServer::new(move || {
        let cors_origins_inner = cors_origins.clone();
        let cors = Cors::default()
            .allowed_origin_fn(move |origin, _req_head| {
                let origins: Vec<&str> = cors_origins_inner.split(',').collect();
                if let Ok(origin_str) = origin.to_str() {
                    origins.iter().any(|o| o.trim() == origin_str)
                } else {
                    false
                }
            })
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .allowed_headers(vec![
                header::AUTHORIZATION,
                header::ACCEPT,
                header::CONTENT_TYPE,
            ])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .app_data(context.clone())
            .wrap(cors)
            .wrap(middleware::Logger::new("%a \"%r\" %s %b %Dms"))
            .wrap(middleware::Compress::default())
            .wrap(middleware::NormalizePath::trim())
            .configure(configure_routes)
            .route(
                "/",
                web::get().to(|| async {
                    HttpResponse::Found()
                        .append_header(("Location", "/api/v1/health"))
                        .finish()
                }),
            )
    })
    .workers(workers)
    .bind(&bind_addr)?
    .run()
    .await
}
