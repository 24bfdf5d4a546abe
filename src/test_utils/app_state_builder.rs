//! `AppState` backed by in-memory mocks, for HTTP-level tests.

use std::sync::Arc;

use axum::http::HeaderValue;
use secrecy::SecretString;
use time::Duration;
use url::Url;

use super::sync_mocks::{InMemorySubscriptionSyncRepo, StubSubscriptionSource};
use crate::{
    adapters::http::app_state::AppState,
    application::use_cases::subscription_sync::SubscriptionSyncUseCases,
    infra::{
        config::{AppConfig, SyncConfig},
        stripe_client::DEFAULT_STRIPE_API_BASE,
    },
};

pub const TEST_ADMIN_PASSWORD: &str = "correct horse battery staple";
pub const TEST_SESSION_SECRET: &str = "test-admin-session-secret";
pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Builder for `AppState` with in-memory mocks.
///
/// ```ignore
/// let repo = Arc::new(InMemorySubscriptionSyncRepo::with_accounts(vec![account]));
/// let app_state = TestAppStateBuilder::new().with_repo(repo.clone()).build();
/// ```
pub struct TestAppStateBuilder {
    repo: Arc<InMemorySubscriptionSyncRepo>,
    source: Arc<StubSubscriptionSource>,
    webhook_secret: Option<&'static str>,
    expose_error_details: bool,
}

impl Default for TestAppStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestAppStateBuilder {
    pub fn new() -> Self {
        Self {
            repo: Arc::new(InMemorySubscriptionSyncRepo::new()),
            source: Arc::new(StubSubscriptionSource::new()),
            webhook_secret: Some(TEST_WEBHOOK_SECRET),
            expose_error_details: true,
        }
    }

    pub fn with_repo(mut self, repo: Arc<InMemorySubscriptionSyncRepo>) -> Self {
        self.repo = repo;
        self
    }

    pub fn with_source(mut self, source: Arc<StubSubscriptionSource>) -> Self {
        self.source = source;
        self
    }

    pub fn without_webhook_secret(mut self) -> Self {
        self.webhook_secret = None;
        self
    }

    /// Behave like a production deployment.
    pub fn hide_error_details(mut self) -> Self {
        self.expose_error_details = false;
        self
    }

    pub fn build(self) -> AppState {
        let config = AppConfig {
            sync: SyncConfig {
                database_url: SecretString::from("postgres://localhost/test"),
                database_max_connections: 1,
                stripe_secret_key: SecretString::from("sk_test_123"),
                stripe_api_base: Url::parse(DEFAULT_STRIPE_API_BASE)
                    .expect("default Stripe base is a valid URL"),
            },
            bind_addr: "127.0.0.1:0".parse().expect("valid socket address"),
            cors_origin: HeaderValue::from_static("http://localhost:3000"),
            admin_password: SecretString::from(TEST_ADMIN_PASSWORD),
            admin_session_secret: SecretString::from(TEST_SESSION_SECRET),
            admin_session_ttl: Duration::hours(24),
            stripe_webhook_secret: self.webhook_secret.map(SecretString::from),
            expose_error_details: self.expose_error_details,
        };

        AppState {
            config: Arc::new(config),
            sync_use_cases: Arc::new(SubscriptionSyncUseCases::new(self.repo, self.source)),
        }
    }
}
