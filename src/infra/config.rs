use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use env_helpers::{get_env, get_env_default};
use secrecy::SecretString;
use url::Url;

use crate::domain::entities::plan::PriceCatalog;

pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub stripe_secret_key: SecretString,
    pub stripe_webhook_secret: SecretString,
    pub stripe_api_base: Url,
    /// Live and test price ids resolved into one table at startup.
    pub price_catalog: Arc<PriceCatalog>,
    /// Scan checkout sessions and subscription metadata when a customer
    /// cannot be matched by id or email.
    pub identity_repair_enabled: bool,
    pub distribution_poll_secs: u64,
    pub log_json: bool,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr: SocketAddr =
            get_env_default("BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 3001)));
        let database_url: String = get_env("DATABASE_URL");
        let stripe_secret_key = SecretString::new(get_env::<String>("STRIPE_SECRET_KEY").into());
        let stripe_webhook_secret =
            SecretString::new(get_env::<String>("STRIPE_WEBHOOK_SECRET").into());
        let stripe_api_base: Url = get_env_default(
            "STRIPE_API_BASE",
            Url::parse("https://api.stripe.com/v1").context("default Stripe API base")?,
        );

        let monthly_ids: String = get_env_default("PRO_MONTHLY_PRICE_IDS", String::new());
        let annual_ids: String = get_env_default("PRO_ANNUAL_PRICE_IDS", String::new());
        let token_packs: String = get_env_default("TOKEN_PACK_PRICES", String::new());
        let monthly_tokens: i64 = get_env_default("MONTHLY_PLAN_TOKENS", 300);
        let annual_monthly_tokens: i64 = get_env_default("ANNUAL_MONTHLY_TOKENS", 300);

        let price_catalog = PriceCatalog::parse(
            &monthly_ids,
            &annual_ids,
            &token_packs,
            monthly_tokens,
            annual_monthly_tokens,
        )
        .map_err(|e| anyhow::anyhow!("invalid price configuration: {e}"))?;

        // Off by default; repair is a backfill tool, not steady-state logic.
        let identity_repair_enabled: bool = get_env_default("IDENTITY_REPAIR_ENABLED", false);
        let distribution_poll_secs: u64 = get_env_default("DISTRIBUTION_POLL_SECS", 3600);
        let log_json: bool = get_env_default("LOG_JSON", false);

        Ok(Self {
            bind_addr,
            database_url,
            stripe_secret_key,
            stripe_webhook_secret,
            stripe_api_base,
            price_catalog: Arc::new(price_catalog),
            identity_repair_enabled,
            distribution_poll_secs,
            log_json,
        })
    }
}
