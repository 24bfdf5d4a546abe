use std::sync::Arc;

use crate::{infra::config::AppConfig, use_cases::subscription_sync::SubscriptionSyncUseCases};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub sync_use_cases: Arc<SubscriptionSyncUseCases>,
}

impl AppState {
    /// Error details to show a client, if this deployment shows them.
    pub fn details(&self, error: impl std::fmt::Display) -> Option<String> {
        self.config
            .expose_error_details
            .then(|| error.to_string())
    }
}
