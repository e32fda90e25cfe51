use std::fmt::Display;

use serde::{Deserialize, Serialize};

#[derive(Default, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    #[default]
    Free,
    Pro,
    Enterprise,
}

impl PlanTier {
    /// Parses a stored plan value, falling back to the free tier for anything
    /// unrecognized.
    pub fn from_str(value: &str) -> Self {
        match value {
            "pro" => PlanTier::Pro,
            "enterprise" => PlanTier::Enterprise,
            _ => PlanTier::Free,
        }
    }
}

impl Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tier = match self {
            PlanTier::Free => "free",
            PlanTier::Pro => "pro",
            PlanTier::Enterprise => "enterprise",
        };
        write!(f, "{}", tier)
    }
}

/// Static price-id-to-tier table built from config. Exact match only.
#[derive(Debug, Clone)]
pub struct PriceMap {
    pro_price_id: String,
    enterprise_price_id: String,
}

impl PriceMap {
    pub fn new(pro_price_id: String, enterprise_price_id: String) -> Self {
        Self {
            pro_price_id,
            enterprise_price_id,
        }
    }

    pub fn plan_for_price(&self, price_id: &str) -> Option<PlanTier> {
        if price_id == self.pro_price_id {
            Some(PlanTier::Pro)
        } else if price_id == self.enterprise_price_id {
            Some(PlanTier::Enterprise)
        } else {
            None
        }
    }

    pub fn pro_price_id(&self) -> &str {
        &self.pro_price_id
    }

    pub fn enterprise_price_id(&self) -> &str {
        &self.enterprise_price_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn price_map() -> PriceMap {
        PriceMap::new("price_pro".to_string(), "price_enterprise".to_string())
    }

    #[test]
    fn maps_configured_price_ids_to_tiers() {
        assert_eq!(price_map().plan_for_price("price_pro"), Some(PlanTier::Pro));
        assert_eq!(
            price_map().plan_for_price("price_enterprise"),
            Some(PlanTier::Enterprise)
        );
    }

    #[test]
    fn unknown_price_id_has_no_tier() {
        assert_eq!(price_map().plan_for_price("price_unknown"), None);
    }

    #[test]
    fn price_match_is_exact_not_prefix() {
        assert_eq!(price_map().plan_for_price("price_pro_v2"), None);
        assert_eq!(price_map().plan_for_price("price_pr"), None);
    }

    #[test]
    fn stored_plan_values_round_trip() {
        assert_eq!(PlanTier::from_str("pro"), PlanTier::Pro);
        assert_eq!(PlanTier::from_str("enterprise"), PlanTier::Enterprise);
        assert_eq!(PlanTier::from_str("free"), PlanTier::Free);
        assert_eq!(PlanTier::from_str("legacy-tier"), PlanTier::Free);
        assert_eq!(PlanTier::Pro.to_string(), "pro");
    }
}
