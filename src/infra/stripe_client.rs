use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;
use std::time::Duration;
use url::Url;

use crate::app_error::{AppError, AppResult};
use crate::application::helpers::event_normalizer::subscription_from_object;
use crate::application::ports::payment_provider::{
    PaymentProviderQuery, ProviderCheckoutSession, ProviderCustomer, ProviderSubscription,
};

/// Default connect timeout (TCP handshake + TLS).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default request timeout (total request/response time).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Only the first page is read; repair is a bounded scan.
const LIST_PAGE_LIMIT: &str = "100";

/// Read-only Stripe REST client backing [`PaymentProviderQuery`].
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: SecretString,
    api_base: Url,
}

impl StripeClient {
    pub fn new(secret_key: SecretString, api_base: Url) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            secret_key,
            api_base,
        })
    }

    fn auth_header(&self) -> String {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:", self.secret_key.expose_secret()));
        format!("Basic {}", encoded)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base.as_str().trim_end_matches('/'), path)
    }

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> AppResult<Option<JsonValue>> {
        let response = self
            .client
            .get(self.endpoint(path))
            .header("Authorization", self.auth_header())
            .query(query)
            .send()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(format!("Stripe request failed: {}", e)))?;

        self.handle_response(response).await
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn handle_response(&self, response: reqwest::Response) -> AppResult<Option<JsonValue>> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body = response.text().await.map_err(|e| {
            AppError::UpstreamUnavailable(format!("Failed to read response: {}", e))
        })?;

        if !status.is_success() {
            tracing::error!(status = %status, body = %body, "Stripe API error");
            return Err(AppError::UpstreamUnavailable(format!(
                "Stripe API error: {}",
                status
            )));
        }

        serde_json::from_str(&body).map(Some).map_err(|e| {
            tracing::error!(body = %body, error = %e, "Failed to parse Stripe response");
            AppError::UpstreamUnavailable(format!("Failed to parse Stripe response: {}", e))
        })
    }
}

#[async_trait]
impl PaymentProviderQuery for StripeClient {
    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> AppResult<Option<ProviderSubscription>> {
        let object = self
            .get_json(&format!("subscriptions/{}", subscription_id), &[])
            .await?;
        Ok(object.as_ref().and_then(subscription_from_object))
    }

    async fn retrieve_customer(&self, customer_id: &str) -> AppResult<Option<ProviderCustomer>> {
        let object = self
            .get_json(&format!("customers/{}", customer_id), &[])
            .await?;
        Ok(object.as_ref().and_then(customer_from_object))
    }

    async fn list_subscriptions_by_customer(
        &self,
        customer_id: &str,
    ) -> AppResult<Vec<ProviderSubscription>> {
        let list = self
            .get_json(
                "subscriptions",
                &[
                    ("customer", customer_id),
                    ("status", "all"),
                    ("limit", LIST_PAGE_LIMIT),
                ],
            )
            .await?;
        Ok(list_items(list.as_ref(), subscription_from_object))
    }

    async fn list_checkout_sessions(
        &self,
        customer_id: &str,
    ) -> AppResult<Vec<ProviderCheckoutSession>> {
        let list = self
            .get_json(
                "checkout/sessions",
                &[("customer", customer_id), ("limit", LIST_PAGE_LIMIT)],
            )
            .await?;
        Ok(list_items(list.as_ref(), checkout_session_from_object))
    }

    async fn list_checkout_line_item_prices(&self, session_id: &str) -> AppResult<Vec<String>> {
        let list = self
            .get_json(
                &format!("checkout/sessions/{}/line_items", session_id),
                &[("limit", LIST_PAGE_LIMIT)],
            )
            .await?;
        Ok(list_items(list.as_ref(), line_item_price))
    }
}

// ============================================================================
// Stripe Objects
// ============================================================================

fn string_field(value: &JsonValue) -> Option<String> {
    value
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Expandable fields arrive either as an id string or an object with `id`.
fn expandable_id(value: &JsonValue) -> Option<String> {
    string_field(value).or_else(|| string_field(&value["id"]))
}

fn customer_from_object(object: &JsonValue) -> Option<ProviderCustomer> {
    Some(ProviderCustomer {
        id: string_field(&object["id"])?,
        email: string_field(&object["email"]),
        deleted: object["deleted"].as_bool().unwrap_or(false),
    })
}

fn checkout_session_from_object(object: &JsonValue) -> Option<ProviderCheckoutSession> {
    Some(ProviderCheckoutSession {
        id: string_field(&object["id"])?,
        customer_id: expandable_id(&object["customer"]),
        client_reference_id: string_field(&object["client_reference_id"]),
        subscription_id: expandable_id(&object["subscription"]),
    })
}

fn line_item_price(object: &JsonValue) -> Option<String> {
    expandable_id(&object["price"])
}

fn list_items<T>(list: Option<&JsonValue>, map: fn(&JsonValue) -> Option<T>) -> Vec<T> {
    list.and_then(|l| l["data"].as_array())
        .map(|items| items.iter().filter_map(map).collect())
        .unwrap_or_default()
}
