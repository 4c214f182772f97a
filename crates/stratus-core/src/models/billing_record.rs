//! Billing record (invoice) model
//!
//! The append-only ledger of charges per customer. Exactly one DRAFT record
//! exists per customer at any time: the forward-looking accumulator for the
//! next month's subscription charges plus the current month's
//! usage-for-display.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Billing record status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BillingStatus {
    /// Forward-looking, continuously recomputed, not yet due
    #[default]
    Draft,
    /// Due; payment attempt in progress or queued
    Pending,
    /// Fully settled
    Paid,
    /// Last payment attempt failed
    Failed,
}

impl fmt::Display for BillingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BillingStatus::Draft => write!(f, "draft"),
            BillingStatus::Pending => write!(f, "pending"),
            BillingStatus::Paid => write!(f, "paid"),
            BillingStatus::Failed => write!(f, "failed"),
        }
    }
}

impl BillingStatus {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "draft" => Some(BillingStatus::Draft),
            "pending" => Some(BillingStatus::Pending),
            "paid" => Some(BillingStatus::Paid),
            "failed" => Some(BillingStatus::Failed),
            _ => None,
        }
    }

    /// Whether settlement may be attempted in this status
    pub fn is_payable(&self) -> bool {
        matches!(self, BillingStatus::Pending | BillingStatus::Failed)
    }
}

/// Billing record type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BillingRecordType {
    /// Ordinary charge invoice
    #[default]
    Charge,
    /// Credit-only record (no provider settlement expected)
    Credit,
}

impl fmt::Display for BillingRecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BillingRecordType::Charge => write!(f, "charge"),
            BillingRecordType::Credit => write!(f, "credit"),
        }
    }
}

impl BillingRecordType {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "charge" => Some(BillingRecordType::Charge),
            "credit" => Some(BillingRecordType::Credit),
            _ => None,
        }
    }
}

/// Billing record entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingRecord {
    pub id: Uuid,
    pub customer_id: i64,

    /// First day of the month this record bills (inclusive)
    pub billing_period_start: NaiveDate,

    /// First day of the following month (exclusive)
    pub billing_period_end: NaiveDate,

    pub status: BillingStatus,
    pub record_type: BillingRecordType,

    pub amount_usd_cents: i64,
    pub amount_paid_usd_cents: i64,

    /// Human-readable reason for the last failed settlement attempt
    pub failure_reason: Option<String>,

    /// Hosted authentication URL (3-D Secure) when a provider requires
    /// out-of-band customer action
    pub payment_action_url: Option<String>,

    pub retry_count: i32,
    pub last_retry_at: Option<DateTime<Utc>>,

    /// Whether the last failure may be retried automatically (propagated
    /// from the provider that produced it)
    pub retryable: bool,

    /// On-chain transaction digest for escrow settlements
    pub tx_digest: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BillingRecord {
    /// A fresh DRAFT covering the given billing period
    pub fn new_draft(customer_id: i64, period_start: NaiveDate, period_end: NaiveDate) -> Self {
        Self {
            id: Uuid::new_v4(),
            customer_id,
            billing_period_start: period_start,
            billing_period_end: period_end,
            status: BillingStatus::Draft,
            record_type: BillingRecordType::Charge,
            amount_usd_cents: 0,
            amount_paid_usd_cents: 0,
            failure_reason: None,
            payment_action_url: None,
            retry_count: 0,
            last_retry_at: None,
            retryable: false,
            tx_digest: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    /// Unpaid remainder of this record
    #[inline]
    pub fn remaining_due_cents(&self) -> i64 {
        (self.amount_usd_cents - self.amount_paid_usd_cents).max(0)
    }

    #[inline]
    pub fn is_draft(&self) -> bool {
        matches!(self.status, BillingStatus::Draft)
    }

    #[inline]
    pub fn is_settled(&self) -> bool {
        matches!(self.status, BillingStatus::Paid)
    }

    /// Whether a server-initiated retry is blocked pending customer
    /// authentication at the hosted payment page
    pub fn awaits_authentication(&self) -> bool {
        matches!(self.status, BillingStatus::Failed) && self.payment_action_url.is_some()
    }

    /// Whether the periodic job may retry this record now
    pub fn eligible_for_auto_retry(
        &self,
        max_attempts: i32,
        interval_hours: i64,
        now: DateTime<Utc>,
    ) -> bool {
        matches!(self.status, BillingStatus::Failed)
            && self.retryable
            && !self.awaits_authentication()
            && self.retry_count < max_attempts
            && self
                .last_retry_at
                .map_or(true, |t| now - t >= chrono::Duration::hours(interval_hours))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> BillingRecord {
        BillingRecord::new_draft(
            7,
            NaiveDate::from_ymd_opt(2025, 2, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
        )
    }

    #[test]
    fn test_new_draft() {
        let record = draft();
        assert_eq!(record.status, BillingStatus::Draft);
        assert_eq!(record.amount_usd_cents, 0);
        assert_eq!(record.remaining_due_cents(), 0);
        assert!(record.is_draft());
    }

    #[test]
    fn test_remaining_due() {
        let mut record = draft();
        record.amount_usd_cents = 20_000;
        record.amount_paid_usd_cents = 5_000;
        assert_eq!(record.remaining_due_cents(), 15_000);

        // Overpayment never reports negative
        record.amount_paid_usd_cents = 25_000;
        assert_eq!(record.remaining_due_cents(), 0);
    }

    #[test]
    fn test_awaits_authentication() {
        let mut record = draft();
        record.status = BillingStatus::Failed;
        assert!(!record.awaits_authentication());

        record.payment_action_url = Some("https://pay.example/3ds".to_string());
        assert!(record.awaits_authentication());

        record.status = BillingStatus::Paid;
        assert!(!record.awaits_authentication());
    }

    #[test]
    fn test_auto_retry_eligibility() {
        let now = Utc::now();
        let mut record = draft();
        record.status = BillingStatus::Failed;
        record.retryable = true;
        assert!(record.eligible_for_auto_retry(3, 24, now));

        // Exhausted attempts
        record.retry_count = 3;
        assert!(!record.eligible_for_auto_retry(3, 24, now));
        record.retry_count = 1;

        // Too soon after the last attempt
        record.last_retry_at = Some(now - chrono::Duration::hours(1));
        assert!(!record.eligible_for_auto_retry(3, 24, now));
        record.last_retry_at = Some(now - chrono::Duration::hours(25));
        assert!(record.eligible_for_auto_retry(3, 24, now));

        // Declines are terminal
        record.retryable = false;
        assert!(!record.eligible_for_auto_retry(3, 24, now));
        record.retryable = true;

        // Requires-authentication blocks automatic retries
        record.payment_action_url = Some("https://pay.example/3ds".to_string());
        assert!(!record.eligible_for_auto_retry(3, 24, now));
    }

    #[test]
    fn test_status_payable() {
        assert!(!BillingStatus::Draft.is_payable());
        assert!(BillingStatus::Pending.is_payable());
        assert!(BillingStatus::Failed.is_payable());
        assert!(!BillingStatus::Paid.is_payable());
    }
}
