use std::sync::Arc;

use secrecy::ExposeSecret;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    adapters::http::app_state::AppState,
    application::{
        ports::subscription_source::SubscriptionSource,
        use_cases::subscription_sync::{SubscriptionSyncRepo, SubscriptionSyncUseCases},
    },
    infra::{
        config::{AppConfig, LogFormat, SyncConfig},
        error::InfraError,
        postgres_persistence,
        stripe_client::StripeClient,
    },
};

const DEFAULT_LOG_FILTER: &str = "sanluisway_billing=info,tower_http=info";

/// Wire the reconciliation use cases to Postgres and Stripe.
pub async fn init_sync_use_cases(config: &SyncConfig) -> Result<SubscriptionSyncUseCases, InfraError> {
    let postgres_arc = Arc::new(
        postgres_persistence(
            config.database_url.expose_secret(),
            config.database_max_connections,
        )
        .await?,
    );
    let stripe = Arc::new(
        StripeClient::new(
            config.stripe_secret_key.clone(),
            config.stripe_api_base.as_str(),
        )
        .map_err(InfraError::HttpClient)?,
    );

    Ok(SubscriptionSyncUseCases::new(
        postgres_arc as Arc<dyn SubscriptionSyncRepo>,
        stripe as Arc<dyn SubscriptionSource>,
    ))
}

pub async fn init_app_state() -> Result<AppState, InfraError> {
    let config = AppConfig::from_env()?;
    let sync_use_cases = init_sync_use_cases(&config.sync).await?;

    Ok(AppState {
        config: Arc::new(config),
        sync_use_cases: Arc::new(sync_use_cases),
    })
}

pub fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());

    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(false).with_level(true))
            .try_init()
            .ok(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init()
            .ok(),
    };
}
