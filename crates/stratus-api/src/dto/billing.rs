//! Billing record DTOs

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use stratus_core::models::{BillingRecord, InvoiceLineItem, InvoicePayment};

/// Billing record response
#[derive(Debug, Serialize)]
pub struct BillingRecordResponse {
    pub id: String,
    pub customer_id: i64,
    pub billing_period_start: NaiveDate,
    pub billing_period_end: NaiveDate,
    pub status: String,
    pub record_type: String,
    pub amount_usd_cents: i64,
    pub amount_paid_usd_cents: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_action_url: Option<String>,
    pub retry_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_digest: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<BillingRecord> for BillingRecordResponse {
    fn from(record: BillingRecord) -> Self {
        Self {
            id: record.id.to_string(),
            customer_id: record.customer_id,
            billing_period_start: record.billing_period_start,
            billing_period_end: record.billing_period_end,
            status: record.status.to_string(),
            record_type: record.record_type.to_string(),
            amount_usd_cents: record.amount_usd_cents,
            amount_paid_usd_cents: record.amount_paid_usd_cents,
            failure_reason: record.failure_reason,
            payment_action_url: record.payment_action_url,
            retry_count: record.retry_count,
            tx_digest: record.tx_digest,
            created_at: record.created_at,
        }
    }
}

/// Line item response
#[derive(Debug, Serialize)]
pub struct LineItemResponse {
    pub id: String,
    pub item_type: String,
    pub description: String,
    pub quantity: i64,
    pub unit_price_usd_cents: i64,
    pub amount_usd_cents: i64,
}

impl From<InvoiceLineItem> for LineItemResponse {
    fn from(item: InvoiceLineItem) -> Self {
        Self {
            id: item.id.to_string(),
            item_type: item.kind.kind_str().to_string(),
            description: item.describe(),
            quantity: item.quantity,
            unit_price_usd_cents: item.unit_price_usd_cents,
            amount_usd_cents: item.amount_usd_cents,
        }
    }
}

/// Invoice payment response
#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub id: String,
    pub source: String,
    pub amount_usd_cents: i64,
    pub reference_id: String,
    pub created_at: DateTime<Utc>,
}

impl From<InvoicePayment> for PaymentResponse {
    fn from(payment: InvoicePayment) -> Self {
        Self {
            id: payment.id.to_string(),
            source: payment.source.to_string(),
            amount_usd_cents: payment.amount_usd_cents,
            reference_id: payment.reference_id,
            created_at: payment.created_at,
        }
    }
}

/// Draft invoice with its line items
#[derive(Debug, Serialize)]
pub struct DraftResponse {
    #[serde(flatten)]
    pub record: BillingRecordResponse,
    pub line_items: Vec<LineItemResponse>,
}

/// Filter parameters for listing billing records
#[derive(Debug, Deserialize)]
pub struct BillingFilterParams {
    pub status: Option<String>,
}

/// Periodic job trigger response
#[derive(Debug, Serialize)]
pub struct BillingRunResponse {
    pub customer_id: i64,
    pub cycles_processed: u32,
    pub retries_attempted: u32,
    pub retries_succeeded: u32,
}
