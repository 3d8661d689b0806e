use std::collections::HashMap;

use chrono::{DateTime, Months, Utc};
use serde::Serialize;

use super::subscription_tier::SubscriptionTier;

/// Billing interval of a subscription plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanPeriod {
    Month,
    Year,
}

impl PlanPeriod {
    pub fn months(&self) -> u32 {
        match self {
            PlanPeriod::Month => 1,
            PlanPeriod::Year => 12,
        }
    }

    /// Calendar-aware addition; clamps to the last day of shorter months.
    pub fn add_to(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        at.checked_add_months(Months::new(self.months()))
    }
}

/// What a provider price id buys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanDescriptor {
    TokenPack { tokens: i64 },
    ProMonthly { tokens_per_period: i64 },
    /// Tokens are drip-fed monthly through a distribution schedule.
    ProAnnual { tokens_per_month: i64 },
}

impl PlanDescriptor {
    pub fn tier(&self) -> Option<SubscriptionTier> {
        match self {
            PlanDescriptor::TokenPack { .. } => None,
            PlanDescriptor::ProMonthly { .. } => Some(SubscriptionTier::ProMonthly),
            PlanDescriptor::ProAnnual { .. } => Some(SubscriptionTier::ProAnnual),
        }
    }

    pub fn period(&self) -> Option<PlanPeriod> {
        match self {
            PlanDescriptor::TokenPack { .. } => None,
            PlanDescriptor::ProMonthly { .. } => Some(PlanPeriod::Month),
            PlanDescriptor::ProAnnual { .. } => Some(PlanPeriod::Year),
        }
    }

    pub fn is_subscription(&self) -> bool {
        self.tier().is_some()
    }
}

/// Single price-id table covering live and test mode ids.
#[derive(Debug, Clone, Default)]
pub struct PriceCatalog {
    prices: HashMap<String, PlanDescriptor>,
}

impl PriceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, price_id: impl Into<String>, plan: PlanDescriptor) -> Self {
        self.prices.insert(price_id.into(), plan);
        self
    }

    pub fn lookup(&self, price_id: &str) -> Option<PlanDescriptor> {
        self.prices.get(price_id).copied()
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// Build the catalog from the raw configuration strings.
    ///
    /// `monthly_ids`/`annual_ids` are comma-separated price ids. `token_packs` is
    /// `price_id:tokens` pairs separated by commas. A price id may appear only once.
    pub fn parse(
        monthly_ids: &str,
        annual_ids: &str,
        token_packs: &str,
        monthly_tokens: i64,
        annual_monthly_tokens: i64,
    ) -> Result<Self, String> {
        let mut catalog = Self::new();

        for id in split_list(monthly_ids) {
            catalog.insert_unique(
                id,
                PlanDescriptor::ProMonthly {
                    tokens_per_period: monthly_tokens,
                },
            )?;
        }

        for id in split_list(annual_ids) {
            catalog.insert_unique(
                id,
                PlanDescriptor::ProAnnual {
                    tokens_per_month: annual_monthly_tokens,
                },
            )?;
        }

        for entry in split_list(token_packs) {
            let (id, tokens) = entry
                .split_once(':')
                .ok_or_else(|| format!("token pack entry '{}' must be price_id:tokens", entry))?;
            let tokens: i64 = tokens
                .trim()
                .parse()
                .map_err(|_| format!("token pack '{}' has a non-numeric amount", id))?;
            if tokens <= 0 {
                return Err(format!("token pack '{}' must grant a positive amount", id));
            }
            catalog.insert_unique(id.trim(), PlanDescriptor::TokenPack { tokens })?;
        }

        Ok(catalog)
    }

    fn insert_unique(&mut self, price_id: &str, plan: PlanDescriptor) -> Result<(), String> {
        if self.prices.insert(price_id.to_string(), plan).is_some() {
            return Err(format!("price id '{}' is configured more than once", price_id));
        }
        Ok(())
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}
