use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::value_objects::plans::PlanTier;

/// Acknowledgement returned to the payment provider after a webhook delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookAck {
    pub received: bool,
}

/// Result of a client-triggered subscription sync.
///
/// Provider failures are reported here instead of surfacing as errors, since
/// this is a user-facing manual action rather than a webhook delivery.
#[derive(Default, Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncOutcome {
    pub synced: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_plan: Option<PlanTier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_plan: Option<PlanTier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_plan: Option<PlanTier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCheckoutModel {
    pub price_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckoutSessionDto {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortalSessionDto {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionDetailsDto {
    pub plan: PlanTier,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_billing_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PricingPlanDto {
    pub name: String,
    pub description: String,
    pub price: String,
    pub price_id: Option<String>,
    pub features: Vec<String>,
    pub popular: bool,
}

/// Per-price result of the config health check against the provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceCheckDto {
    pub plan: PlanTier,
    pub price_id: String,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigHealthDto {
    pub price_checks: Vec<PriceCheckDto>,
}
