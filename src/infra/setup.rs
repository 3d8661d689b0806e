use crate::{
    adapters::http::app_state::AppState,
    application::ports::payment_provider::PaymentProviderQuery,
    infra::{config::AppConfig, postgres_persistence, stripe_client::StripeClient},
    use_cases::{
        billing_webhook::{BillingReconciler, ProcessedEventRepo},
        distribution::{DistributionScheduleRepo, DistributionScheduler},
        identity::{IdentityResolver, UserBillingRepo},
        ledger::TokenLedger,
    },
};
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub async fn init_app_state(config: AppConfig) -> anyhow::Result<AppState> {
    if config.price_catalog.is_empty() {
        tracing::warn!("No price ids configured, every billing event will be ignored");
    }

    let postgres_arc = Arc::new(postgres_persistence(&config.database_url).await?);
    let provider = Arc::new(StripeClient::new(
        config.stripe_secret_key.clone(),
        config.stripe_api_base.clone(),
    )?) as Arc<dyn PaymentProviderQuery>;

    let user_repo_arc = postgres_arc.clone() as Arc<dyn UserBillingRepo>;
    let schedule_repo_arc = postgres_arc.clone() as Arc<dyn DistributionScheduleRepo>;
    let processed_repo_arc = postgres_arc.clone() as Arc<dyn ProcessedEventRepo>;

    let ledger = TokenLedger::new(user_repo_arc.clone());
    let identity = IdentityResolver::new(
        user_repo_arc.clone(),
        provider.clone(),
        config.identity_repair_enabled,
    );
    let scheduler = DistributionScheduler::new(schedule_repo_arc, ledger.clone());

    let reconciler = BillingReconciler::new(
        identity,
        ledger,
        scheduler,
        user_repo_arc,
        provider,
        config.price_catalog.clone(),
        processed_repo_arc,
    );

    tracing::info!(
        prices = config.price_catalog.len(),
        identity_repair = config.identity_repair_enabled,
        "Billing reconciler configured"
    );

    Ok(AppState {
        config: Arc::new(config),
        reconciler: Arc::new(reconciler),
    })
}

/// `LOG_JSON=true` switches the console output to structured JSON lines.
pub fn init_tracing(log_json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "billing_reconciler=info,tower_http=info".into());

    let registry = tracing_subscriber::registry().with(filter);

    if log_json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init()
            .ok();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_level(true).pretty())
            .try_init()
            .ok();
    }
}
