//! Fake payment provider for identity and state machine tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::{
    app_error::{AppError, AppResult},
    application::ports::payment_provider::{
        PaymentProviderQuery, ProviderCheckoutSession, ProviderCustomer, ProviderSubscription,
    },
};

#[derive(Default)]
pub struct FakePaymentProvider {
    pub subscriptions: Mutex<HashMap<String, ProviderSubscription>>,
    pub customers: Mutex<HashMap<String, ProviderCustomer>>,
    pub checkout_sessions: Mutex<Vec<ProviderCheckoutSession>>,
    pub line_item_prices: Mutex<HashMap<String, Vec<String>>>,
    /// Every query fails with `UpstreamUnavailable` while set.
    pub unavailable: AtomicBool,
    pub subscription_requests: AtomicUsize,
    pub customer_requests: AtomicUsize,
}

impl FakePaymentProvider {
    pub fn add_subscription(&self, subscription: ProviderSubscription) {
        self.subscriptions
            .lock()
            .unwrap()
            .insert(subscription.id.clone(), subscription);
    }

    pub fn add_customer(&self, customer: ProviderCustomer) {
        self.customers
            .lock()
            .unwrap()
            .insert(customer.id.clone(), customer);
    }

    pub fn add_checkout_session(&self, session: ProviderCheckoutSession) {
        self.checkout_sessions.lock().unwrap().push(session);
    }

    pub fn add_checkout_line_items(&self, session_id: &str, price_ids: &[&str]) {
        self.line_item_prices.lock().unwrap().insert(
            session_id.to_string(),
            price_ids.iter().map(|p| p.to_string()).collect(),
        );
    }

    fn check_available(&self) -> AppResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::UpstreamUnavailable("fake provider offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentProviderQuery for FakePaymentProvider {
    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> AppResult<Option<ProviderSubscription>> {
        self.subscription_requests.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self
            .subscriptions
            .lock()
            .unwrap()
            .get(subscription_id)
            .cloned())
    }

    async fn retrieve_customer(&self, customer_id: &str) -> AppResult<Option<ProviderCustomer>> {
        self.customer_requests.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self.customers.lock().unwrap().get(customer_id).cloned())
    }

    async fn list_subscriptions_by_customer(
        &self,
        customer_id: &str,
    ) -> AppResult<Vec<ProviderSubscription>> {
        self.check_available()?;
        Ok(self
            .subscriptions
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.customer_id.as_deref() == Some(customer_id))
            .cloned()
            .collect())
    }

    async fn list_checkout_sessions(
        &self,
        customer_id: &str,
    ) -> AppResult<Vec<ProviderCheckoutSession>> {
        self.check_available()?;
        Ok(self
            .checkout_sessions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.customer_id.as_deref() == Some(customer_id))
            .cloned()
            .collect())
    }

    async fn list_checkout_line_item_prices(&self, session_id: &str) -> AppResult<Vec<String>> {
        self.check_available()?;
        Ok(self
            .line_item_prices
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }
}
