//! Use case wiring and `AppState` construction over in-memory mocks.

use std::net::SocketAddr;
use std::sync::Arc;

use secrecy::SecretString;
use url::Url;

use crate::{
    adapters::http::app_state::AppState,
    application::{
        ports::payment_provider::PaymentProviderQuery,
        use_cases::{
            billing_webhook::{BillingReconciler, ProcessedEventRepo},
            distribution::{DistributionScheduleRepo, DistributionScheduler},
            identity::{IdentityResolver, UserBillingRepo},
            ledger::TokenLedger,
        },
    },
    domain::entities::user_billing::UserBillingRecord,
    infra::config::AppConfig,
    test_utils::{
        FakePaymentProvider, InMemoryDistributionScheduleRepo, InMemoryProcessedEventRepo,
        InMemoryUserBillingRepo, test_catalog,
    },
};

pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret";

// ============================================================================
// TestMocks
// ============================================================================

/// Shared in-memory dependencies. Clones share state, so tests can inspect
/// the stores after running a use case built from them.
#[derive(Clone, Default)]
pub struct TestMocks {
    pub users: Arc<InMemoryUserBillingRepo>,
    pub schedules: Arc<InMemoryDistributionScheduleRepo>,
    pub processed_events: Arc<InMemoryProcessedEventRepo>,
    pub provider: Arc<FakePaymentProvider>,
}

impl TestMocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(self, user: UserBillingRecord) -> Self {
        self.users.insert(user);
        self
    }

    pub fn ledger(&self) -> TokenLedger {
        TokenLedger::new(self.users.clone() as Arc<dyn UserBillingRepo>)
    }

    pub fn identity(&self, repair_enabled: bool) -> IdentityResolver {
        IdentityResolver::new(
            self.users.clone() as Arc<dyn UserBillingRepo>,
            self.provider.clone() as Arc<dyn PaymentProviderQuery>,
            repair_enabled,
        )
    }

    pub fn scheduler(&self) -> DistributionScheduler {
        DistributionScheduler::new(
            self.schedules.clone() as Arc<dyn DistributionScheduleRepo>,
            self.ledger(),
        )
    }

    pub fn reconciler(&self) -> BillingReconciler {
        self.reconciler_with_repair(false)
    }

    pub fn reconciler_with_repair(&self, repair_enabled: bool) -> BillingReconciler {
        BillingReconciler::new(
            self.identity(repair_enabled),
            self.ledger(),
            self.scheduler(),
            self.users.clone() as Arc<dyn UserBillingRepo>,
            self.provider.clone() as Arc<dyn PaymentProviderQuery>,
            Arc::new(test_catalog()),
            self.processed_events.clone() as Arc<dyn ProcessedEventRepo>,
        )
    }
}

// ============================================================================
// TestAppStateBuilder
// ============================================================================

/// Builder for creating `AppState` with in-memory mocks for testing.
///
/// # Example
///
/// ```ignore
/// let user = create_test_user(|u| u.provider_customer_id = Some("cus_1".into()));
/// let builder = TestAppStateBuilder::new().with_user(user);
/// let mocks = builder.mocks();
/// let app_state = builder.build();
/// ```
pub struct TestAppStateBuilder {
    mocks: TestMocks,
    webhook_secret: String,
    identity_repair_enabled: bool,
}

impl Default for TestAppStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestAppStateBuilder {
    pub fn new() -> Self {
        Self {
            mocks: TestMocks::new(),
            webhook_secret: TEST_WEBHOOK_SECRET.to_string(),
            identity_repair_enabled: false,
        }
    }

    pub fn with_user(mut self, user: UserBillingRecord) -> Self {
        self.mocks = self.mocks.with_user(user);
        self
    }

    pub fn with_webhook_secret(mut self, secret: &str) -> Self {
        self.webhook_secret = secret.to_string();
        self
    }

    pub fn with_identity_repair(mut self, enabled: bool) -> Self {
        self.identity_repair_enabled = enabled;
        self
    }

    /// Handles onto the stores the built state will use.
    pub fn mocks(&self) -> TestMocks {
        self.mocks.clone()
    }

    pub fn build(self) -> AppState {
        let config = AppConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            database_url: "postgres://localhost/billing_test".to_string(),
            stripe_secret_key: SecretString::from("sk_test_unused"),
            stripe_webhook_secret: SecretString::from(self.webhook_secret),
            stripe_api_base: Url::parse("http://127.0.0.1:1/v1/").unwrap(),
            price_catalog: Arc::new(test_catalog()),
            identity_repair_enabled: self.identity_repair_enabled,
            distribution_poll_secs: 3600,
            log_json: false,
        };

        AppState {
            config: Arc::new(config),
            reconciler: Arc::new(
                self.mocks
                    .reconciler_with_repair(self.identity_repair_enabled),
            ),
        }
    }
}
