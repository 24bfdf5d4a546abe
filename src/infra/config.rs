use std::net::SocketAddr;

use axum::http::HeaderValue;
use env_helpers::get_env_default;
use secrecy::SecretString;
use strum::EnumString;
use time::Duration;
use url::Url;

use crate::infra::{error::InfraError, stripe_client::DEFAULT_STRIPE_API_BASE};

/// Log output selected by `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    pub fn from_env() -> Self {
        std::env::var("LOG_FORMAT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }
}

/// Settings needed by anything that reconciles subscriptions, including the batch binary.
pub struct SyncConfig {
    /// Postgres URL. Carries the service credential used for all writes.
    pub database_url: SecretString,
    pub database_max_connections: u32,
    pub stripe_secret_key: SecretString,
    pub stripe_api_base: Url,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, InfraError> {
        let database_url = required_secret("DATABASE_URL")?;
        let stripe_secret_key = required_secret("STRIPE_SECRET_KEY")?;
        let database_max_connections: u32 = get_env_default("DATABASE_MAX_CONNECTIONS", 5);
        let stripe_api_base = parse_var(
            "STRIPE_API_BASE",
            &get_env_default("STRIPE_API_BASE", DEFAULT_STRIPE_API_BASE.to_string()),
        )?;

        Ok(Self {
            database_url,
            database_max_connections,
            stripe_secret_key,
            stripe_api_base,
        })
    }
}

/// Settings of the admin HTTP service.
pub struct AppConfig {
    pub sync: SyncConfig,
    pub bind_addr: SocketAddr,
    pub cors_origin: HeaderValue,
    pub admin_password: SecretString,
    pub admin_session_secret: SecretString,
    pub admin_session_ttl: Duration,
    /// Unset disables webhook processing; deliveries are answered with 500.
    pub stripe_webhook_secret: Option<SecretString>,
    /// Include error details in responses. Off when `APP_ENV=production`.
    pub expose_error_details: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, InfraError> {
        let sync = SyncConfig::from_env()?;

        let bind_addr = parse_var(
            "BIND_ADDR",
            &get_env_default("BIND_ADDR", "127.0.0.1:3001".to_string()),
        )?;
        let cors_origin = parse_var(
            "CORS_ORIGIN",
            &get_env_default("CORS_ORIGIN", "http://localhost:3000".to_string()),
        )?;
        let admin_password = required_secret("ADMIN_PASSWORD")?;
        let admin_session_secret = required_secret("ADMIN_SESSION_SECRET")?;
        let admin_session_ttl_hours: i64 = get_env_default("ADMIN_SESSION_TTL_HOURS", 24);
        let stripe_webhook_secret = optional("STRIPE_WEBHOOK_SECRET").map(SecretString::from);
        let app_env: String = get_env_default("APP_ENV", "development".to_string());

        Ok(Self {
            sync,
            bind_addr,
            cors_origin,
            admin_password,
            admin_session_secret,
            admin_session_ttl: Duration::hours(admin_session_ttl_hours),
            stripe_webhook_secret,
            expose_error_details: !is_production(&app_env),
        })
    }
}

fn optional(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn required_secret(var: &'static str) -> Result<SecretString, InfraError> {
    optional(var)
        .map(SecretString::from)
        .ok_or(InfraError::ConfigMissing { var })
}

fn parse_var<T>(var: &'static str, raw: &str) -> Result<T, InfraError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| InfraError::ConfigInvalid {
        var,
        reason: e.to_string(),
    })
}

fn is_production(app_env: &str) -> bool {
    app_env.trim().eq_ignore_ascii_case("production")
}
