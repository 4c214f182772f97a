//! Subscription tiers
//!
//! Tiers carry the monthly subscription price and the metered usage rate
//! per service type. All prices are integer USD cents.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ServiceType;

/// Subscription tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Starter,
    Pro,
    Enterprise,
}

impl Tier {
    /// Monthly subscription price in USD cents
    pub fn monthly_price_usd_cents(&self) -> i64 {
        match self {
            Tier::Free => 0,
            Tier::Starter => 900,
            Tier::Pro => 2_900,
            Tier::Enterprise => 18_500,
        }
    }

    /// Metered usage rate in USD cents per 1000 billable requests
    pub fn usage_cents_per_1000(&self, service: ServiceType) -> i64 {
        match self {
            Tier::Free => 0,
            Tier::Starter => match service {
                ServiceType::Rpc => 10,
                ServiceType::Indexer => 20,
                ServiceType::Webhooks => 15,
            },
            Tier::Pro => match service {
                ServiceType::Rpc => 8,
                ServiceType::Indexer => 16,
                ServiceType::Webhooks => 12,
            },
            Tier::Enterprise => match service {
                ServiceType::Rpc => 5,
                ServiceType::Indexer => 10,
                ServiceType::Webhooks => 8,
            },
        }
    }

    /// Whether this tier carries a subscription charge
    #[inline]
    pub fn is_paid(&self) -> bool {
        self.monthly_price_usd_cents() > 0
    }

    /// Whether moving to `other` is an upgrade (strictly more expensive)
    pub fn is_upgrade_to(&self, other: Tier) -> bool {
        other.monthly_price_usd_cents() > self.monthly_price_usd_cents()
    }

    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "free" => Some(Tier::Free),
            "starter" => Some(Tier::Starter),
            "pro" => Some(Tier::Pro),
            "enterprise" => Some(Tier::Enterprise),
            _ => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Free => write!(f, "free"),
            Tier::Starter => write!(f, "starter"),
            Tier::Pro => write!(f, "pro"),
            Tier::Enterprise => write!(f, "enterprise"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prices() {
        assert_eq!(Tier::Free.monthly_price_usd_cents(), 0);
        assert_eq!(Tier::Starter.monthly_price_usd_cents(), 900);
        assert_eq!(Tier::Pro.monthly_price_usd_cents(), 2_900);
        assert_eq!(Tier::Enterprise.monthly_price_usd_cents(), 18_500);
    }

    #[test]
    fn test_upgrade_ordering() {
        assert!(Tier::Pro.is_upgrade_to(Tier::Enterprise));
        assert!(!Tier::Pro.is_upgrade_to(Tier::Starter));
        assert!(!Tier::Pro.is_upgrade_to(Tier::Pro));
        assert!(Tier::Free.is_upgrade_to(Tier::Starter));
    }

    #[test]
    fn test_from_str() {
        assert_eq!(Tier::from_str("PRO"), Some(Tier::Pro));
        assert_eq!(Tier::from_str("enterprise"), Some(Tier::Enterprise));
        assert_eq!(Tier::from_str("gold"), None);
    }

    #[test]
    fn test_free_tier_has_no_usage_rate() {
        for st in ServiceType::all() {
            assert_eq!(Tier::Free.usage_cents_per_1000(st), 0);
        }
    }
}
