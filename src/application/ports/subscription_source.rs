use async_trait::async_trait;

use crate::{
    app_error::AppResult,
    domain::entities::subscription::{RemoteCustomer, RemoteSubscription},
};

/// Read access to the payment provider that owns the canonical subscription state.
///
/// Lookups return `AppError::NotFound` when the provider does not know the id
/// and `AppError::Remote` for every other provider or transport failure.
#[async_trait]
pub trait SubscriptionSource: Send + Sync {
    /// Fetch one subscription by its provider id.
    async fn get_subscription(&self, subscription_id: &str) -> AppResult<RemoteSubscription>;

    /// Subscriptions the provider currently reports as active, at most `limit`.
    async fn list_active(&self, limit: u32) -> AppResult<Vec<RemoteSubscription>>;

    async fn get_customer(&self, customer_id: &str) -> AppResult<RemoteCustomer>;

    /// Cheap call used to verify credentials and connectivity before a sweep.
    async fn check_connection(&self) -> AppResult<()>;
}
