use serde::{Deserialize, Serialize};

/// Subscription tier stored on the user billing record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "subscription_tier", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTier {
    #[default]
    Free,
    ProMonthly,
    ProAnnual,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Free => "free",
            SubscriptionTier::ProMonthly => "pro_monthly",
            SubscriptionTier::ProAnnual => "pro_annual",
        }
    }

    /// Whether this tier is backed by a paid provider subscription
    pub fn is_paid(&self) -> bool {
        !matches!(self, SubscriptionTier::Free)
    }
}

impl std::fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SubscriptionTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(SubscriptionTier::Free),
            "pro_monthly" => Ok(SubscriptionTier::ProMonthly),
            "pro_annual" => Ok(SubscriptionTier::ProAnnual),
            _ => Err(format!(
                "Invalid subscription tier: {}. Must be 'free', 'pro_monthly' or 'pro_annual'",
                s
            )),
        }
    }
}
