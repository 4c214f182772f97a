//! Service instance model
//!
//! One row per (customer, service type). Tracks the current tier, the
//! provisioning state, and any scheduled downgrade or cancellation.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::Tier;

/// Blockchain-data service types offered by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    /// JSON-RPC node access
    Rpc,
    /// Indexed chain-data queries
    Indexer,
    /// Event webhook delivery
    Webhooks,
}

impl ServiceType {
    /// Numeric identifier used by the usage-stats subsystem
    pub fn as_i16(&self) -> i16 {
        match self {
            ServiceType::Rpc => 1,
            ServiceType::Indexer => 2,
            ServiceType::Webhooks => 3,
        }
    }

    /// Parse from the numeric identifier
    pub fn from_i16(n: i16) -> Option<Self> {
        match n {
            1 => Some(ServiceType::Rpc),
            2 => Some(ServiceType::Indexer),
            3 => Some(ServiceType::Webhooks),
            _ => None,
        }
    }

    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "rpc" => Some(ServiceType::Rpc),
            "indexer" => Some(ServiceType::Indexer),
            "webhooks" => Some(ServiceType::Webhooks),
            _ => None,
        }
    }

    /// All service types, in stable order
    pub fn all() -> [ServiceType; 3] {
        [ServiceType::Rpc, ServiceType::Indexer, ServiceType::Webhooks]
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceType::Rpc => write!(f, "rpc"),
            ServiceType::Indexer => write!(f, "indexer"),
            ServiceType::Webhooks => write!(f, "webhooks"),
        }
    }
}

/// Provisioning state of a service instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    /// Active and serving traffic
    Enabled,
    /// Turned off by the customer
    Disabled,
    /// Blocked by the platform (e.g. unpaid invoices)
    Suspended,
    /// Never provisioned
    #[default]
    NotProvisioned,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceState::Enabled => write!(f, "enabled"),
            ServiceState::Disabled => write!(f, "disabled"),
            ServiceState::Suspended => write!(f, "suspended"),
            ServiceState::NotProvisioned => write!(f, "not_provisioned"),
        }
    }
}

impl ServiceState {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "enabled" => Some(ServiceState::Enabled),
            "disabled" => Some(ServiceState::Disabled),
            "suspended" => Some(ServiceState::Suspended),
            "not_provisioned" => Some(ServiceState::NotProvisioned),
            _ => None,
        }
    }
}

/// A pending end-of-period tier change
///
/// At most one may be scheduled at a time; an upgrade always clears it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduledChange {
    /// Move to a cheaper tier at the end of the current billing period
    Downgrade { to: Tier },
    /// Terminate the subscription at the end of the current billing period
    Cancel,
}

impl ScheduledChange {
    /// Database discriminant
    pub fn kind_str(&self) -> &'static str {
        match self {
            ScheduledChange::Downgrade { .. } => "downgrade",
            ScheduledChange::Cancel => "cancel",
        }
    }

    /// The downgrade target, if this is a downgrade
    pub fn target_tier(&self) -> Option<Tier> {
        match self {
            ScheduledChange::Downgrade { to } => Some(*to),
            ScheduledChange::Cancel => None,
        }
    }
}

/// Service instance entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub customer_id: i64,
    pub service_type: ServiceType,
    pub tier: Tier,
    pub state: ServiceState,

    /// Pending downgrade or cancellation, if any
    pub scheduled_change: Option<ScheduledChange>,

    /// When the scheduled change takes effect (end of current period)
    pub scheduled_effective_date: Option<NaiveDate>,

    /// Unpaid subscription invoice blocking full activation
    pub sub_pending_invoice_id: Option<Uuid>,

    /// Whether this subscription has ever completed a paid cycle
    pub paid_once: bool,

    pub last_billed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceInstance {
    /// Whether the service is actively subscribed and serving
    #[inline]
    pub fn is_active(&self) -> bool {
        matches!(self.state, ServiceState::Enabled)
    }

    /// Whether usage on this service is currently billable.
    ///
    /// A service blocked by an unpaid pending subscription charge accrues
    /// no usage line items until the charge settles.
    pub fn is_usage_billable(&self) -> bool {
        self.is_active() && self.sub_pending_invoice_id.is_none()
    }

    /// The tier that will actually be charged at the next billing boundary.
    ///
    /// Returns `None` when a cancellation is scheduled (nothing is billed).
    pub fn next_billed_tier(&self) -> Option<Tier> {
        match self.scheduled_change {
            None => Some(self.tier),
            Some(ScheduledChange::Downgrade { to }) => Some(to),
            Some(ScheduledChange::Cancel) => None,
        }
    }

    /// Apply an immediate upgrade: the new tier takes effect now and any
    /// scheduled downgrade or cancellation is cleared without trace.
    pub fn apply_upgrade(&mut self, new_tier: Tier) {
        self.tier = new_tier;
        self.scheduled_change = None;
        self.scheduled_effective_date = None;
        self.state = ServiceState::Enabled;
    }

    /// Apply a scheduled change whose effective date has arrived.
    ///
    /// Returns the change that was applied, or `None` if nothing was due.
    pub fn apply_due_scheduled_change(&mut self, today: NaiveDate) -> Option<ScheduledChange> {
        let due = match (self.scheduled_change, self.scheduled_effective_date) {
            (Some(change), Some(effective)) if effective <= today => change,
            _ => return None,
        };

        match due {
            ScheduledChange::Downgrade { to } => {
                self.tier = to;
            }
            ScheduledChange::Cancel => {
                self.tier = Tier::Free;
                self.state = ServiceState::NotProvisioned;
            }
        }
        self.scheduled_change = None;
        self.scheduled_effective_date = None;
        Some(due)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn instance(tier: Tier) -> ServiceInstance {
        ServiceInstance {
            customer_id: 1,
            service_type: ServiceType::Rpc,
            tier,
            state: ServiceState::Enabled,
            scheduled_change: None,
            scheduled_effective_date: None,
            sub_pending_invoice_id: None,
            paid_once: true,
            last_billed_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_service_type_roundtrip() {
        for st in ServiceType::all() {
            assert_eq!(ServiceType::from_i16(st.as_i16()), Some(st));
            assert_eq!(ServiceType::from_str(&st.to_string()), Some(st));
        }
        assert_eq!(ServiceType::from_i16(99), None);
    }

    #[test]
    fn test_upgrade_clears_scheduled_change() {
        let mut svc = instance(Tier::Pro);
        svc.scheduled_change = Some(ScheduledChange::Downgrade { to: Tier::Starter });
        svc.scheduled_effective_date = NaiveDate::from_ymd_opt(2025, 2, 1);

        svc.apply_upgrade(Tier::Enterprise);

        assert_eq!(svc.tier, Tier::Enterprise);
        assert_eq!(svc.scheduled_change, None);
        assert_eq!(svc.scheduled_effective_date, None);
    }

    #[test]
    fn test_next_billed_tier() {
        let mut svc = instance(Tier::Pro);
        assert_eq!(svc.next_billed_tier(), Some(Tier::Pro));

        svc.scheduled_change = Some(ScheduledChange::Downgrade { to: Tier::Starter });
        assert_eq!(svc.next_billed_tier(), Some(Tier::Starter));

        svc.scheduled_change = Some(ScheduledChange::Cancel);
        assert_eq!(svc.next_billed_tier(), None);
    }

    #[test]
    fn test_due_downgrade_applies() {
        let mut svc = instance(Tier::Pro);
        svc.scheduled_change = Some(ScheduledChange::Downgrade { to: Tier::Starter });
        svc.scheduled_effective_date = NaiveDate::from_ymd_opt(2025, 2, 1);

        let today = NaiveDate::from_ymd_opt(2025, 1, 31).unwrap();
        assert_eq!(svc.apply_due_scheduled_change(today), None);
        assert_eq!(svc.tier, Tier::Pro);

        let today = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();
        assert_eq!(
            svc.apply_due_scheduled_change(today),
            Some(ScheduledChange::Downgrade { to: Tier::Starter })
        );
        assert_eq!(svc.tier, Tier::Starter);
        assert_eq!(svc.scheduled_change, None);
    }

    #[test]
    fn test_due_cancellation_deprovisions() {
        let mut svc = instance(Tier::Starter);
        svc.scheduled_change = Some(ScheduledChange::Cancel);
        svc.scheduled_effective_date = NaiveDate::from_ymd_opt(2025, 3, 1);

        let today = NaiveDate::from_ymd_opt(2025, 3, 2).unwrap();
        assert_eq!(
            svc.apply_due_scheduled_change(today),
            Some(ScheduledChange::Cancel)
        );
        assert_eq!(svc.tier, Tier::Free);
        assert_eq!(svc.state, ServiceState::NotProvisioned);
    }

    #[test]
    fn test_pending_subscription_blocks_usage_billing() {
        let mut svc = instance(Tier::Starter);
        assert!(svc.is_usage_billable());

        svc.sub_pending_invoice_id = Some(Uuid::new_v4());
        assert!(!svc.is_usage_billable());
    }
}
