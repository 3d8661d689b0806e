use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::interval;
use tracing::{error, info};

use crate::use_cases::billing_webhook::BillingReconciler;

/// Drives the monthly token drip for annual subscriptions.
pub async fn run_distribution_loop(reconciler: Arc<BillingReconciler>, poll_secs: u64) {
    let poll_secs = poll_secs.max(1);
    let mut ticker = interval(Duration::from_secs(poll_secs));

    info!(
        "Token distribution service started (polling every {}s)",
        poll_secs
    );

    loop {
        ticker.tick().await;

        if let Err(e) = reconciler.scheduler().distribute_due(Utc::now()).await {
            error!(error = ?e, "Token distribution run failed");
        }
    }
}
