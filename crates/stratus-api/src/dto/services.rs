//! Service subscription DTOs

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use stratus_core::models::ServiceInstance;
use stratus_providers::ProviderInfo;
use validator::Validate;

/// Subscribe / upgrade / downgrade request body
#[derive(Debug, Deserialize, Validate)]
pub struct TierRequest {
    /// Target tier name (starter, pro, enterprise)
    #[validate(length(min = 1))]
    pub tier: String,
}

/// Service instance response
#[derive(Debug, Serialize)]
pub struct ServiceInstanceResponse {
    pub service_type: String,
    pub tier: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_change: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_tier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_effective_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_pending_invoice_id: Option<String>,
    pub paid_once: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_billed_at: Option<DateTime<Utc>>,
}

impl From<ServiceInstance> for ServiceInstanceResponse {
    fn from(svc: ServiceInstance) -> Self {
        Self {
            service_type: svc.service_type.to_string(),
            tier: svc.tier.to_string(),
            state: svc.state.to_string(),
            scheduled_change: svc.scheduled_change.map(|c| c.kind_str().to_string()),
            scheduled_tier: svc
                .scheduled_change
                .and_then(|c| c.target_tier())
                .map(|t| t.to_string()),
            scheduled_effective_date: svc.scheduled_effective_date,
            sub_pending_invoice_id: svc.sub_pending_invoice_id.map(|id| id.to_string()),
            paid_once: svc.paid_once,
            last_billed_at: svc.last_billed_at,
        }
    }
}

/// Tier change response: the updated instance plus payment state
#[derive(Debug, Serialize)]
pub struct TierChangeResponse {
    pub service: ServiceInstanceResponse,
    pub payment_pending: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_action_url: Option<String>,
}

/// Attach-card request body
#[derive(Debug, Deserialize, Validate)]
pub struct AttachCardRequest {
    #[validate(length(min = 1))]
    pub payment_method_id: String,
}

/// Payment method response
#[derive(Debug, Serialize)]
pub struct PaymentMethodResponse {
    pub source: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl From<ProviderInfo> for PaymentMethodResponse {
    fn from(info: ProviderInfo) -> Self {
        Self {
            source: info.source.to_string(),
            label: info.label,
            detail: info.detail,
        }
    }
}
