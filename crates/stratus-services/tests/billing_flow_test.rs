//! End-to-end billing flow tests.
//!
//! These exercise the engine against a live Postgres with the migrations
//! applied (DATABASE_URL) and are ignored by default.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use stratus_core::config::BillingConfig;
use stratus_core::models::{PaymentSource, ServiceType, Tier};
use stratus_core::traits::UsageSource;
use stratus_core::AppError;
use stratus_db::repositories::{customer_repo, invoice_repo};
use stratus_db::{create_pool, CustomerLock, PgPool};
use stratus_providers::{
    CardGateway, CardProvider, ChainError, ChainReceipt, EscrowBackend, EscrowProvider,
    GatewayCharge, GatewayChargeStatus, GatewayError, PaypalProvider, ProviderRegistry,
};
use stratus_services::{clock::FixedClock, credits, invoices, settlement, tiers, usage};

struct HappyChain;

#[async_trait]
impl EscrowBackend for HappyChain {
    async fn charge(
        &self,
        _escrow_object_id: &str,
        amount_usd: Decimal,
    ) -> Result<ChainReceipt, ChainError> {
        Ok(ChainReceipt {
            tx_digest: format!("0xcharge_{}", amount_usd),
        })
    }

    async fn deposit(
        &self,
        _escrow_object_id: &str,
        amount_usd: Decimal,
    ) -> Result<ChainReceipt, ChainError> {
        Ok(ChainReceipt {
            tx_digest: format!("0xdeposit_{}", amount_usd),
        })
    }

    async fn withdraw(
        &self,
        _escrow_object_id: &str,
        amount_usd: Decimal,
    ) -> Result<ChainReceipt, ChainError> {
        Ok(ChainReceipt {
            tx_digest: format!("0xwithdraw_{}", amount_usd),
        })
    }

    async fn get_account(
        &self,
        _escrow_object_id: &str,
    ) -> Result<stratus_providers::ChainAccount, ChainError> {
        Ok(stratus_providers::ChainAccount {
            balance_usd: Decimal::ZERO,
            owner: "0xowner".to_string(),
        })
    }
}

struct HappyGateway;

#[async_trait]
impl CardGateway for HappyGateway {
    async fn charge(
        &self,
        _gateway_customer_id: &str,
        _payment_method_id: &str,
        _amount_usd_cents: i64,
        _description: &str,
    ) -> Result<GatewayCharge, GatewayError> {
        Ok(GatewayCharge {
            charge_id: format!("ch_{}", uuid::Uuid::new_v4()),
            status: GatewayChargeStatus::Succeeded,
            hosted_invoice_url: None,
            decline_reason: None,
        })
    }

    async fn create_customer(&self, _wallet_address: &str) -> Result<String, GatewayError> {
        Ok("cus_test".to_string())
    }
}

struct FixedUsage(i64);

#[async_trait]
impl UsageSource for FixedUsage {
    async fn get_billable_request_count(
        &self,
        _customer_id: i64,
        _service_type: ServiceType,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<i64, AppError> {
        Ok(self.0)
    }
}

fn registry() -> ProviderRegistry {
    ProviderRegistry::new(vec![
        Arc::new(EscrowProvider::new(Arc::new(HappyChain))),
        Arc::new(CardProvider::new(Arc::new(HappyGateway))),
        Arc::new(PaypalProvider::new()),
    ])
}

async fn pool() -> PgPool {
    let url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgresql://localhost/stratus_billing".to_string());
    create_pool(&url, Some(5)).await.unwrap()
}

async fn seed_customer(pool: &PgPool, balance_cents: i64, period_start: NaiveDate) -> i64 {
    let wallet = format!("0xwallet_{}", uuid::Uuid::new_v4());
    let mut conn = pool.acquire().await.unwrap();
    let customer = customer_repo::create(&mut conn, &wallet, Some("0xescrow"), period_start)
        .await
        .unwrap();
    customer_repo::adjust_balance(&mut conn, customer.id, balance_cents)
        .await
        .unwrap();
    customer.id
}

#[tokio::test]
#[ignore] // Requires database
async fn test_credits_then_escrow_settlement_order() {
    let pool = pool().await;
    let config = BillingConfig::default();
    let clock = FixedClock::at(Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap());
    let registry = registry();

    let customer_id =
        seed_customer(&pool, 100_000, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()).await;

    let mut session = CustomerLock::acquire(&pool, customer_id, "test", &config)
        .await
        .unwrap();

    // $200 invoice, $50 credit, plenty of escrow.
    credits::grant_credit(&mut session, customer_id, 5_000, None, "promo")
        .await
        .unwrap();
    let draft = invoices::get_or_create_draft(&mut session, customer_id)
        .await
        .unwrap();
    invoice_repo::adjust_total(session.conn(), draft.id, 20_000)
        .await
        .unwrap();
    invoice_repo::set_status(session.conn(), draft.id, stratus_core::models::BillingStatus::Pending)
        .await
        .unwrap();

    let result = settlement::process_invoice_payment(&mut session, draft.id, &registry, &clock)
        .await
        .unwrap();

    assert!(result.outcome.is_paid());
    assert_eq!(result.payments.len(), 2);
    assert_eq!(result.payments[0].source, PaymentSource::Credit);
    assert_eq!(result.payments[0].amount_usd_cents, 5_000);
    assert_eq!(result.payments[1].source, PaymentSource::Escrow);
    assert_eq!(result.payments[1].amount_usd_cents, 15_000);

    session.commit().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires database
async fn test_usage_sync_is_idempotent() {
    let pool = pool().await;
    let config = BillingConfig::default();
    let clock = FixedClock::at(Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap());
    let registry = registry();
    let source = FixedUsage(10_000);

    let customer_id =
        seed_customer(&pool, 1_000_000, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()).await;

    let mut session = CustomerLock::acquire(&pool, customer_id, "test", &config)
        .await
        .unwrap();

    tiers::subscribe(&mut session, ServiceType::Rpc, Tier::Pro, &registry, &clock)
        .await
        .unwrap();

    let draft = invoices::get_or_create_draft(&mut session, customer_id)
        .await
        .unwrap();
    let services = stratus_db::repositories::service_repo::list_for_customer(
        session.conn(),
        customer_id,
    )
    .await
    .unwrap();

    let total_first =
        usage::sync_usage_to_draft(&mut session, &draft, &services, &source, &clock)
            .await
            .unwrap();
    let items_first = invoice_repo::list_line_items(session.conn(), draft.id)
        .await
        .unwrap();
    let record_first = invoice_repo::find_by_id(session.conn(), draft.id)
        .await
        .unwrap()
        .unwrap();

    // Second sync with no new data: identical lines and total.
    let total_second =
        usage::sync_usage_to_draft(&mut session, &draft, &services, &source, &clock)
            .await
            .unwrap();
    let items_second = invoice_repo::list_line_items(session.conn(), draft.id)
        .await
        .unwrap();
    let record_second = invoice_repo::find_by_id(session.conn(), draft.id)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(total_first, total_second);
    assert_eq!(items_first.len(), items_second.len());
    assert_eq!(record_first.amount_usd_cents, record_second.amount_usd_cents);

    session.rollback().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires database
async fn test_upgrade_clears_scheduled_downgrade_without_trace() {
    let pool = pool().await;
    let config = BillingConfig::default();
    let clock = FixedClock::at(Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap());
    let registry = registry();

    let customer_id =
        seed_customer(&pool, 10_000_000, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()).await;

    let mut session = CustomerLock::acquire(&pool, customer_id, "test", &config)
        .await
        .unwrap();

    tiers::subscribe(&mut session, ServiceType::Rpc, Tier::Pro, &registry, &clock)
        .await
        .unwrap();
    tiers::schedule_tier_downgrade(&mut session, ServiceType::Rpc, Tier::Starter, &clock)
        .await
        .unwrap();

    let result =
        tiers::handle_tier_upgrade(&mut session, ServiceType::Rpc, Tier::Enterprise, &registry, &clock)
            .await
            .unwrap();

    assert_eq!(result.service.tier, Tier::Enterprise);
    assert_eq!(result.service.scheduled_change, None);
    assert_eq!(result.service.scheduled_effective_date, None);

    // The DRAFT's subscription amount is exactly the enterprise price.
    let draft = invoices::get_or_create_draft(&mut session, customer_id)
        .await
        .unwrap();
    let items = invoice_repo::list_line_items(session.conn(), draft.id)
        .await
        .unwrap();
    let sub_total: i64 = items
        .iter()
        .filter(|i| i.kind.kind_str() == "subscription")
        .map(|i| i.amount_usd_cents)
        .sum();
    assert_eq!(sub_total, Tier::Enterprise.monthly_price_usd_cents());

    session.rollback().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires database
async fn test_delayed_month_end_bills_prior_month() {
    let pool = pool().await;
    let config = BillingConfig::default();
    let registry = registry();
    let source = FixedUsage(50_000);

    // Customer's period is January; the draft bills February. Process while
    // the wall clock is already February 1: January's usage must be billed.
    let clock = FixedClock::at(Utc.with_ymd_and_hms(2025, 1, 5, 0, 0, 0).unwrap());
    let customer_id =
        seed_customer(&pool, 10_000_000, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()).await;

    let mut session = CustomerLock::acquire(&pool, customer_id, "test", &config)
        .await
        .unwrap();
    tiers::subscribe(&mut session, ServiceType::Rpc, Tier::Pro, &registry, &clock)
        .await
        .unwrap();

    clock.set(Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap());

    let customer = customer_repo::get_for_update(session.conn(), customer_id)
        .await
        .unwrap();
    let cycle = invoices::finalize_billing_cycle(&mut session, &customer, &source, &registry, &clock)
        .await
        .unwrap();

    let items = invoice_repo::list_line_items(session.conn(), cycle.settled.invoice_id)
        .await
        .unwrap();
    let usage_line = items
        .iter()
        .find(|i| i.kind.kind_str() == "usage")
        .expect("usage line present");

    match &usage_line.kind {
        stratus_core::models::LineItemKind::Usage {
            period_start,
            period_end,
            ..
        } => {
            assert_eq!(*period_start, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
            assert_eq!(*period_end, NaiveDate::from_ymd_opt(2025, 2, 1).unwrap());
        }
        other => panic!("unexpected kind: {:?}", other),
    }

    session.rollback().await.unwrap();
}
