//! Invoice line items
//!
//! Each line item carries a tagged `LineItemKind` holding only the fields
//! that kind needs. Formatting and totaling sites match exhaustively, so a
//! new kind cannot silently fall through to a default case.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ServiceType, Tier};

/// What a line item charges for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LineItemKind {
    /// Full-month subscription for one service at a tier
    Subscription {
        service_type: ServiceType,
        tier: Tier,
    },
    /// Pro-rated charge for an immediate mid-period upgrade
    Proration {
        service_type: ServiceType,
        from_tier: Tier,
        to_tier: Tier,
        days_remaining: i64,
        days_in_period: i64,
    },
    /// Metered usage for one service over one window
    Usage {
        service_type: ServiceType,
        period_start: NaiveDate,
        period_end: NaiveDate,
    },
    /// Extra-resource add-on
    AddOn { label: String },
    /// Applied account credit
    Credit { credit_id: Uuid },
    /// Tax
    Tax { label: String },
}

impl LineItemKind {
    /// Database discriminant for this kind
    pub fn kind_str(&self) -> &'static str {
        match self {
            LineItemKind::Subscription { .. } => "subscription",
            LineItemKind::Proration { .. } => "proration",
            LineItemKind::Usage { .. } => "usage",
            LineItemKind::AddOn { .. } => "add_on",
            LineItemKind::Credit { .. } => "credit",
            LineItemKind::Tax { .. } => "tax",
        }
    }
}

/// Invoice line item entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceLineItem {
    pub id: Uuid,
    pub billing_record_id: Uuid,
    pub kind: LineItemKind,
    pub quantity: i64,
    pub unit_price_usd_cents: i64,
    pub amount_usd_cents: i64,
    pub created_at: DateTime<Utc>,
}

impl InvoiceLineItem {
    /// Full-month subscription line for one service at a tier
    pub fn subscription(billing_record_id: Uuid, service_type: ServiceType, tier: Tier) -> Self {
        let price = tier.monthly_price_usd_cents();
        Self {
            id: Uuid::new_v4(),
            billing_record_id,
            kind: LineItemKind::Subscription { service_type, tier },
            quantity: 1,
            unit_price_usd_cents: price,
            amount_usd_cents: price,
            created_at: Utc::now(),
        }
    }

    /// Pro-rated upgrade line. The amount is the price difference scaled by
    /// the remaining fraction of the period, floored to whole cents.
    pub fn proration(
        billing_record_id: Uuid,
        service_type: ServiceType,
        from_tier: Tier,
        to_tier: Tier,
        days_remaining: i64,
        days_in_period: i64,
    ) -> Self {
        let amount =
            prorated_upgrade_cents(from_tier, to_tier, days_remaining, days_in_period);
        Self {
            id: Uuid::new_v4(),
            billing_record_id,
            kind: LineItemKind::Proration {
                service_type,
                from_tier,
                to_tier,
                days_remaining,
                days_in_period,
            },
            quantity: 1,
            unit_price_usd_cents: amount,
            amount_usd_cents: amount,
            created_at: Utc::now(),
        }
    }

    /// Metered usage line. `cents_per_1000` is the tier's rate for the
    /// service; the amount rounds down so a customer is never charged a
    /// fraction of a cent.
    pub fn usage(
        billing_record_id: Uuid,
        service_type: ServiceType,
        period_start: NaiveDate,
        period_end: NaiveDate,
        request_count: i64,
        cents_per_1000: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            billing_record_id,
            kind: LineItemKind::Usage {
                service_type,
                period_start,
                period_end,
            },
            quantity: request_count,
            unit_price_usd_cents: cents_per_1000,
            amount_usd_cents: usage_charge_cents(request_count, cents_per_1000),
            created_at: Utc::now(),
        }
    }

    /// Applied-credit line (negative amount)
    pub fn credit(billing_record_id: Uuid, credit_id: Uuid, amount_usd_cents: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            billing_record_id,
            kind: LineItemKind::Credit { credit_id },
            quantity: 1,
            unit_price_usd_cents: -amount_usd_cents,
            amount_usd_cents: -amount_usd_cents,
            created_at: Utc::now(),
        }
    }

    /// Human-readable description for statements and API responses
    pub fn describe(&self) -> String {
        match &self.kind {
            LineItemKind::Subscription { service_type, tier } => {
                format!("{} plan subscription for {}", tier, service_type)
            }
            LineItemKind::Proration {
                service_type,
                from_tier,
                to_tier,
                days_remaining,
                days_in_period,
            } => format!(
                "{} upgrade {} -> {} ({} of {} days)",
                service_type, from_tier, to_tier, days_remaining, days_in_period
            ),
            LineItemKind::Usage {
                service_type,
                period_start,
                period_end,
            } => format!(
                "{} usage {} to {}",
                service_type, period_start, period_end
            ),
            LineItemKind::AddOn { label } => format!("Add-on: {}", label),
            LineItemKind::Credit { credit_id } => format!("Credit {}", credit_id),
            LineItemKind::Tax { label } => format!("Tax: {}", label),
        }
    }
}

/// `floor(request_count * cents_per_1000 / 1000)`
pub fn usage_charge_cents(request_count: i64, cents_per_1000: i64) -> i64 {
    request_count * cents_per_1000 / 1000
}

/// `floor((new - old) * days_remaining / days_in_period)`
pub fn prorated_upgrade_cents(
    from_tier: Tier,
    to_tier: Tier,
    days_remaining: i64,
    days_in_period: i64,
) -> i64 {
    let diff = to_tier.monthly_price_usd_cents() - from_tier.monthly_price_usd_cents();
    if diff <= 0 || days_in_period <= 0 {
        return 0;
    }
    diff * days_remaining / days_in_period
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_charge_rounds_down() {
        // 1999 requests at 10c/1000 = 19.99c -> 19
        assert_eq!(usage_charge_cents(1_999, 10), 19);
        assert_eq!(usage_charge_cents(0, 10), 0);
        assert_eq!(usage_charge_cents(1_000, 10), 10);
        assert_eq!(usage_charge_cents(999, 10), 9);
    }

    #[test]
    fn test_prorated_upgrade_pro_to_enterprise() {
        // floor((18500 - 2900) * 30 / 31) = floor(15096.77) = 15096
        assert_eq!(
            prorated_upgrade_cents(Tier::Pro, Tier::Enterprise, 30, 31),
            15_096
        );
    }

    #[test]
    fn test_prorated_upgrade_full_period() {
        assert_eq!(
            prorated_upgrade_cents(Tier::Pro, Tier::Enterprise, 31, 31),
            15_600
        );
    }

    #[test]
    fn test_proration_never_negative() {
        assert_eq!(prorated_upgrade_cents(Tier::Enterprise, Tier::Pro, 10, 30), 0);
        assert_eq!(prorated_upgrade_cents(Tier::Pro, Tier::Pro, 10, 30), 0);
    }

    #[test]
    fn test_zero_quantity_usage_line() {
        let line = InvoiceLineItem::usage(
            Uuid::new_v4(),
            ServiceType::Rpc,
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 2, 1).unwrap(),
            0,
            10,
        );
        assert_eq!(line.quantity, 0);
        assert_eq!(line.amount_usd_cents, 0);
        assert_eq!(line.kind.kind_str(), "usage");
    }

    #[test]
    fn test_credit_line_is_negative() {
        let line = InvoiceLineItem::credit(Uuid::new_v4(), Uuid::new_v4(), 5_000);
        assert_eq!(line.amount_usd_cents, -5_000);
    }

    #[test]
    fn test_kind_serde_roundtrip() {
        let kind = LineItemKind::Usage {
            service_type: ServiceType::Indexer,
            period_start: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            period_end: NaiveDate::from_ymd_opt(2025, 2, 1).unwrap(),
        };
        let json = serde_json::to_string(&kind).unwrap();
        assert!(json.contains("\"type\":\"usage\""));
        let back: LineItemKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, kind);
    }
}
