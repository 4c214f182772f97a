//! Customer credit model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Customer credit entity
///
/// Credits are consumed soonest-expiring-first and are never restored once
/// applied, even if a later payment step for the same invoice fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerCredit {
    pub id: Uuid,
    pub customer_id: i64,
    pub original_amount_usd_cents: i64,
    pub remaining_amount_usd_cents: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CustomerCredit {
    /// Whether this credit can still be applied at `now`
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.remaining_amount_usd_cents > 0
            && self.expires_at.map_or(true, |exp| exp > now)
    }

    /// Consume up to `amount_cents`, returning how much was actually taken
    pub fn consume(&mut self, amount_cents: i64) -> i64 {
        let taken = amount_cents.min(self.remaining_amount_usd_cents).max(0);
        self.remaining_amount_usd_cents -= taken;
        taken
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn credit(remaining: i64, expires_at: Option<DateTime<Utc>>) -> CustomerCredit {
        CustomerCredit {
            id: Uuid::new_v4(),
            customer_id: 1,
            original_amount_usd_cents: remaining,
            remaining_amount_usd_cents: remaining,
            expires_at,
            reason: "promo".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_expired_credit_inactive() {
        let now = Utc::now();
        assert!(credit(100, None).is_active(now));
        assert!(credit(100, Some(now + Duration::days(1))).is_active(now));
        assert!(!credit(100, Some(now - Duration::seconds(1))).is_active(now));
        assert!(!credit(0, None).is_active(now));
    }

    #[test]
    fn test_partial_consume_keeps_remainder() {
        let mut c = credit(5_000, None);
        assert_eq!(c.consume(2_000), 2_000);
        assert_eq!(c.remaining_amount_usd_cents, 3_000);

        // Consuming more than remains takes only the remainder
        assert_eq!(c.consume(10_000), 3_000);
        assert_eq!(c.remaining_amount_usd_cents, 0);
        assert_eq!(c.consume(100), 0);
    }
}
