//! Row-mapping helpers
//!
//! `sqlx::FromRow` structs for the core billing tables, with `From` impls
//! into the domain models. Shared by the repositories and the service
//! layer's transaction-scoped queries so both read the same column sets.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::FromRow;
use stratus_core::models::{
    BillingRecord, BillingRecordType, BillingStatus, Customer, CustomerCredit, EscrowOperation,
    EscrowTransaction, InvoiceLineItem, InvoicePayment, LineItemKind, PaymentSource,
    ScheduledChange, ServiceInstance, ServiceState, ServiceType, Tier,
};
use uuid::Uuid;

/// Column list for `customers` queries
pub const CUSTOMER_COLUMNS: &str = "id, wallet_address, escrow_object_id, balance_usd_cents, \
     spending_limit_usd_cents, billing_period_start, provider_priority, \
     stripe_customer_id, card_payment_method_id, card_active, created_at, updated_at";

#[derive(Debug, FromRow)]
pub struct CustomerRow {
    pub id: i64,
    pub wallet_address: String,
    pub escrow_object_id: Option<String>,
    pub balance_usd_cents: i64,
    pub spending_limit_usd_cents: i64,
    pub billing_period_start: NaiveDate,
    pub provider_priority: Vec<String>,
    pub stripe_customer_id: Option<String>,
    pub card_payment_method_id: Option<String>,
    pub card_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<CustomerRow> for Customer {
    fn from(row: CustomerRow) -> Self {
        Self {
            id: row.id,
            wallet_address: row.wallet_address,
            escrow_object_id: row.escrow_object_id,
            balance_usd_cents: row.balance_usd_cents,
            spending_limit_usd_cents: row.spending_limit_usd_cents,
            billing_period_start: row.billing_period_start,
            provider_priority: row
                .provider_priority
                .iter()
                .filter_map(|s| PaymentSource::from_str(s))
                .collect(),
            stripe_customer_id: row.stripe_customer_id,
            card_payment_method_id: row.card_payment_method_id,
            card_active: row.card_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Column list for `service_instances` queries
pub const SERVICE_COLUMNS: &str = "customer_id, service_type, tier, state, scheduled_change, \
     scheduled_tier, scheduled_effective_date, sub_pending_invoice_id, paid_once, \
     last_billed_at, created_at, updated_at";

#[derive(Debug, FromRow)]
pub struct ServiceInstanceRow {
    pub customer_id: i64,
    pub service_type: i16,
    pub tier: String,
    pub state: String,
    pub scheduled_change: Option<String>,
    pub scheduled_tier: Option<String>,
    pub scheduled_effective_date: Option<NaiveDate>,
    pub sub_pending_invoice_id: Option<Uuid>,
    pub paid_once: bool,
    pub last_billed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ServiceInstanceRow> for ServiceInstance {
    fn from(row: ServiceInstanceRow) -> Self {
        let scheduled_change = match row.scheduled_change.as_deref() {
            Some("downgrade") => row
                .scheduled_tier
                .as_deref()
                .and_then(Tier::from_str)
                .map(|to| ScheduledChange::Downgrade { to }),
            Some("cancel") => Some(ScheduledChange::Cancel),
            _ => None,
        };

        Self {
            customer_id: row.customer_id,
            service_type: ServiceType::from_i16(row.service_type).unwrap_or(ServiceType::Rpc),
            tier: Tier::from_str(&row.tier).unwrap_or(Tier::Free),
            state: ServiceState::from_str(&row.state).unwrap_or(ServiceState::NotProvisioned),
            scheduled_change,
            scheduled_effective_date: row.scheduled_effective_date,
            sub_pending_invoice_id: row.sub_pending_invoice_id,
            paid_once: row.paid_once,
            last_billed_at: row.last_billed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Column list for `billing_records` queries
pub const BILLING_RECORD_COLUMNS: &str = "id, customer_id, billing_period_start, billing_period_end, status, record_type, \
     amount_usd_cents, amount_paid_usd_cents, failure_reason, payment_action_url, \
     retry_count, last_retry_at, retryable, tx_digest, created_at, updated_at";

#[derive(Debug, FromRow)]
pub struct BillingRecordRow {
    pub id: Uuid,
    pub customer_id: i64,
    pub billing_period_start: NaiveDate,
    pub billing_period_end: NaiveDate,
    pub status: String,
    pub record_type: String,
    pub amount_usd_cents: i64,
    pub amount_paid_usd_cents: i64,
    pub failure_reason: Option<String>,
    pub payment_action_url: Option<String>,
    pub retry_count: i32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub retryable: bool,
    pub tx_digest: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<BillingRecordRow> for BillingRecord {
    fn from(row: BillingRecordRow) -> Self {
        Self {
            id: row.id,
            customer_id: row.customer_id,
            billing_period_start: row.billing_period_start,
            billing_period_end: row.billing_period_end,
            status: BillingStatus::from_str(&row.status).unwrap_or(BillingStatus::Draft),
            record_type: BillingRecordType::from_str(&row.record_type)
                .unwrap_or(BillingRecordType::Charge),
            amount_usd_cents: row.amount_usd_cents,
            amount_paid_usd_cents: row.amount_paid_usd_cents,
            failure_reason: row.failure_reason,
            payment_action_url: row.payment_action_url,
            retry_count: row.retry_count,
            last_retry_at: row.last_retry_at,
            retryable: row.retryable,
            tx_digest: row.tx_digest,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Column list for `invoice_line_items` queries
pub const LINE_ITEM_COLUMNS: &str =
    "id, billing_record_id, item_type, detail, quantity, unit_price_usd_cents, \
     amount_usd_cents, created_at";

#[derive(Debug, FromRow)]
pub struct LineItemRow {
    pub id: Uuid,
    pub billing_record_id: Uuid,
    pub item_type: String,
    pub detail: Value,
    pub quantity: i64,
    pub unit_price_usd_cents: i64,
    pub amount_usd_cents: i64,
    pub created_at: DateTime<Utc>,
}

impl From<LineItemRow> for InvoiceLineItem {
    fn from(row: LineItemRow) -> Self {
        // `detail` is the serialized LineItemKind; an unreadable payload
        // degrades to an add-on label rather than dropping the row.
        let kind: LineItemKind = serde_json::from_value(row.detail).unwrap_or(LineItemKind::AddOn {
            label: row.item_type,
        });
        Self {
            id: row.id,
            billing_record_id: row.billing_record_id,
            kind,
            quantity: row.quantity,
            unit_price_usd_cents: row.unit_price_usd_cents,
            amount_usd_cents: row.amount_usd_cents,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct InvoicePaymentRow {
    pub id: Uuid,
    pub billing_record_id: Uuid,
    pub source: String,
    pub amount_usd_cents: i64,
    pub reference_id: String,
    pub created_at: DateTime<Utc>,
}

impl From<InvoicePaymentRow> for InvoicePayment {
    fn from(row: InvoicePaymentRow) -> Self {
        Self {
            id: row.id,
            billing_record_id: row.billing_record_id,
            source: PaymentSource::from_str(&row.source).unwrap_or(PaymentSource::Credit),
            amount_usd_cents: row.amount_usd_cents,
            reference_id: row.reference_id,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct CreditRow {
    pub id: Uuid,
    pub customer_id: i64,
    pub original_amount_usd_cents: i64,
    pub remaining_amount_usd_cents: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<CreditRow> for CustomerCredit {
    fn from(row: CreditRow) -> Self {
        Self {
            id: row.id,
            customer_id: row.customer_id,
            original_amount_usd_cents: row.original_amount_usd_cents,
            remaining_amount_usd_cents: row.remaining_amount_usd_cents,
            expires_at: row.expires_at,
            reason: row.reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct EscrowTransactionRow {
    pub id: Uuid,
    pub customer_id: i64,
    pub operation: String,
    pub amount_usd: Decimal,
    pub tx_digest: String,
    pub billing_record_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<EscrowTransactionRow> for EscrowTransaction {
    fn from(row: EscrowTransactionRow) -> Self {
        Self {
            id: row.id,
            customer_id: row.customer_id,
            operation: EscrowOperation::from_str(&row.operation).unwrap_or(EscrowOperation::Charge),
            amount_usd: row.amount_usd,
            tx_digest: row.tx_digest,
            billing_record_id: row.billing_record_id,
            created_at: row.created_at,
        }
    }
}
