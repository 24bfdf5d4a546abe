use async_trait::async_trait;
use chrono::DateTime;
use reqwest::{Client, StatusCode};
use url::form_urlencoded;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::{
    app_error::{AppError, AppResult},
    application::{ports::subscription_source::SubscriptionSource, validators::constant_time_eq},
    domain::entities::{
        subscription::{RemoteCustomer, RemoteSubscription, SubscriptionPeriod},
        subscription_status::RemoteStatus,
    },
    infra::http_client::try_build_client,
};

pub const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

/// API version whose subscription objects carry the billing period at the top level.
const STRIPE_API_VERSION: &str = "2023-10-16";

/// Maximum age of a webhook signature timestamp, in seconds.
const WEBHOOK_TOLERANCE_SECS: i64 = 300;

#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: SecretString,
    api_base: String,
}

impl StripeClient {
    pub fn new(secret_key: SecretString, api_base: &str) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: try_build_client()?,
            secret_key,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    fn auth_header(&self) -> String {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:", self.secret_key.expose_secret()));
        format!("Basic {}", encoded)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{}", self.api_base, path))
            .header("Authorization", self.auth_header())
            .header("Stripe-Version", STRIPE_API_VERSION)
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    pub async fn retrieve_subscription(&self, subscription_id: &str) -> AppResult<StripeSubscription> {
        let response = self
            .get(&format!("/subscriptions/{}", path_segment(subscription_id)))
            .send()
            .await
            .map_err(|e| AppError::Remote(format!("Stripe request failed: {}", e)))?;

        self.handle_response(response).await
    }

    /// List subscriptions, optionally only those in `status`.
    pub async fn list_subscriptions(
        &self,
        limit: u32,
        status: Option<&str>,
    ) -> AppResult<Vec<StripeSubscription>> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(status) = status {
            query.push(("status", status.to_string()));
        }

        let response = self
            .get("/subscriptions")
            .query(&query)
            .send()
            .await
            .map_err(|e| AppError::Remote(format!("Stripe request failed: {}", e)))?;

        let list: StripeList<StripeSubscription> = self.handle_response(response).await?;
        Ok(list.data)
    }

    // ========================================================================
    // Customers
    // ========================================================================

    pub async fn retrieve_customer(&self, customer_id: &str) -> AppResult<StripeCustomer> {
        let response = self
            .get(&format!("/customers/{}", path_segment(customer_id)))
            .send()
            .await
            .map_err(|e| AppError::Remote(format!("Stripe request failed: {}", e)))?;

        self.handle_response(response).await
    }

    // ========================================================================
    // Webhook Signature Verification
    // ========================================================================

    pub fn verify_webhook_signature(
        payload: &str,
        signature_header: &str,
        webhook_secret: &str,
    ) -> AppResult<()> {
        Self::verify_webhook_signature_at(
            payload,
            signature_header,
            webhook_secret,
            chrono::Utc::now().timestamp(),
        )
    }

    fn verify_webhook_signature_at(
        payload: &str,
        signature_header: &str,
        webhook_secret: &str,
        now: i64,
    ) -> AppResult<()> {
        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        // Header format: "t=timestamp,v1=signature,..."
        let mut timestamp: Option<&str> = None;
        let mut signatures: Vec<&str> = Vec::new();

        for part in signature_header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            match key {
                "t" => timestamp = Some(value),
                "v1" => signatures.push(value),
                _ => {}
            }
        }

        let timestamp =
            timestamp.ok_or_else(|| AppError::InvalidInput("Missing timestamp in signature".into()))?;

        if signatures.is_empty() {
            return Err(AppError::InvalidInput("Missing signature".into()));
        }

        let mut mac = Hmac::<Sha256>::new_from_slice(webhook_secret.as_bytes())
            .map_err(|_| AppError::Internal("HMAC error".into()))?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload.as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());

        if !signatures.iter().any(|sig| constant_time_eq(sig, &expected)) {
            return Err(AppError::InvalidInput("Invalid signature".into()));
        }

        let ts: i64 = timestamp
            .parse()
            .map_err(|_| AppError::InvalidInput("Invalid timestamp".into()))?;
        if (now - ts).abs() > WEBHOOK_TOLERANCE_SECS {
            return Err(AppError::InvalidInput("Timestamp too old".into()));
        }

        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn handle_response<T: for<'de> Deserialize<'de>>(
        &self,
        response: reqwest::Response,
    ) -> AppResult<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::Remote(format!("Failed to read response: {}", e)))?;

        if status == StatusCode::NOT_FOUND {
            return Err(AppError::NotFound);
        }

        if !status.is_success() {
            tracing::error!(status = %status, body = %body, "Stripe API error");

            if let Ok(error) = serde_json::from_str::<StripeErrorResponse>(&body) {
                return Err(AppError::Remote(format!(
                    "Stripe error ({}): {}",
                    status,
                    error.error.message.unwrap_or(error.error.error_type)
                )));
            }

            return Err(AppError::Remote(format!("Stripe API error ({})", status)));
        }

        serde_json::from_str(&body).map_err(|e| {
            tracing::error!(error = %e, "Failed to parse Stripe response");
            AppError::Remote(format!("Failed to parse Stripe response: {}", e))
        })
    }
}

/// Percent-encode an id for use as one URL path segment.
fn path_segment(id: &str) -> String {
    form_urlencoded::byte_serialize(id.as_bytes()).collect()
}

#[async_trait]
impl SubscriptionSource for StripeClient {
    async fn get_subscription(&self, subscription_id: &str) -> AppResult<RemoteSubscription> {
        Ok(self.retrieve_subscription(subscription_id).await?.into())
    }

    async fn list_active(&self, limit: u32) -> AppResult<Vec<RemoteSubscription>> {
        let subscriptions = self.list_subscriptions(limit, Some("active")).await?;
        Ok(subscriptions.into_iter().map(RemoteSubscription::from).collect())
    }

    async fn get_customer(&self, customer_id: &str) -> AppResult<RemoteCustomer> {
        Ok(self.retrieve_customer(customer_id).await?.into())
    }

    async fn check_connection(&self) -> AppResult<()> {
        self.list_subscriptions(1, None).await.map(|_| ())
    }
}

// ============================================================================
// Stripe Types
// ============================================================================

/// An id field that Stripe may return either as a string or expanded object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StripeRef {
    Id(String),
    Expanded { id: String },
}

impl StripeRef {
    pub fn id(&self) -> &str {
        match self {
            StripeRef::Id(id) | StripeRef::Expanded { id } => id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    pub customer: Option<StripeRef>,
    pub status: String,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub items: Option<StripeSubscriptionItems>,
}

impl StripeSubscription {
    /// Billing period, taken from the first item when the top level lacks it.
    pub fn period(&self) -> SubscriptionPeriod {
        let item = self.items.as_ref().and_then(|items| items.data.first());
        let start = self
            .current_period_start
            .or_else(|| item.and_then(|i| i.current_period_start));
        let end = self
            .current_period_end
            .or_else(|| item.and_then(|i| i.current_period_end));
        SubscriptionPeriod {
            start: start.and_then(|s| DateTime::from_timestamp(s, 0)),
            end: end.and_then(|s| DateTime::from_timestamp(s, 0)),
        }
    }
}

impl From<StripeSubscription> for RemoteSubscription {
    fn from(sub: StripeSubscription) -> Self {
        let period = sub.period();
        RemoteSubscription {
            customer: sub.customer.as_ref().map(|c| c.id().to_string()),
            status: RemoteStatus::from_stripe(&sub.status),
            period,
            id: sub.id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StripeSubscriptionItems {
    pub data: Vec<StripeSubscriptionItem>,
}

#[derive(Debug, Deserialize)]
pub struct StripeSubscriptionItem {
    pub id: String,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct StripeList<T> {
    pub data: Vec<T>,
}

/// A customer object. Deleted customers carry only `id` and `deleted`.
#[derive(Debug, Deserialize)]
pub struct StripeCustomer {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub deleted: bool,
}

impl From<StripeCustomer> for RemoteCustomer {
    fn from(customer: StripeCustomer) -> Self {
        RemoteCustomer {
            id: customer.id,
            email: customer.email.filter(|_| !customer.deleted),
            name: customer.name,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    pub customer: Option<StripeRef>,
    pub client_reference_id: Option<String>,
    pub subscription: Option<StripeRef>,
}

#[derive(Debug, Deserialize)]
pub struct StripeErrorResponse {
    pub error: StripeError,
}

#[derive(Debug, Deserialize)]
pub struct StripeError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: Option<String>,
    pub code: Option<String>,
}

// ============================================================================
// Webhook Event Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StripeWebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeWebhookEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeWebhookEventData {
    pub object: serde_json::Value,
}

impl StripeWebhookEvent {
    pub fn get_checkout_session(&self) -> Option<StripeCheckoutSession> {
        serde_json::from_value(self.data.object.clone()).ok()
    }

    pub fn get_subscription(&self) -> Option<StripeSubscription> {
        serde_json::from_value(self.data.object.clone()).ok()
    }
}

/// Build a `Stripe-Signature` header for `payload`, as Stripe would send it.
#[cfg(test)]
pub fn sign_webhook_payload(payload: &str, secret: &str, timestamp: i64) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{}.{}", timestamp, payload).as_bytes());
    format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    )
}
