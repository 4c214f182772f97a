//! Shared handler state

use sqlx::PgPool;
use std::sync::Arc;
use stratus_core::config::BillingConfig;
use stratus_core::traits::{Clock, UsageSource};
use stratus_providers::{CardGateway, ProviderRegistry};

/// Everything the billing handlers need, registered as actix app data
pub struct ApiContext {
    pub pool: PgPool,
    pub registry: ProviderRegistry,
    pub usage_source: Arc<dyn UsageSource>,
    pub clock: Arc<dyn Clock>,
    /// Gateway handle for customer creation when attaching a first card
    pub card_gateway: Arc<dyn CardGateway>,
    pub billing: BillingConfig,
}

impl ApiContext {
    pub fn new(
        pool: PgPool,
        registry: ProviderRegistry,
        usage_source: Arc<dyn UsageSource>,
        clock: Arc<dyn Clock>,
        card_gateway: Arc<dyn CardGateway>,
        billing: BillingConfig,
    ) -> Self {
        Self {
            pool,
            registry,
            usage_source,
            clock,
            card_gateway,
            billing,
        }
    }
}
