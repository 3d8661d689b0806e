pub mod billing_webhooks;

use axum::{Router, routing::get};

use crate::adapters::http::app_state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .nest("/billing", billing_webhooks::router())
}

async fn health() -> &'static str {
    "ok"
}
