//! Stripe webhook handler.

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use secrecy::ExposeSecret;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    adapters::http::{app_error_impl::error_json, app_state::AppState},
    app_error::{AppError, ErrorCode},
    application::{
        use_cases::subscription_sync::{ReconcileFailure, SingleRecordOutcome},
        validators::is_valid_subscription_id,
    },
    domain::entities::subscription::RemoteSubscription,
    infra::stripe_client::{StripeClient, StripeWebhookEvent},
};

pub fn router() -> Router<AppState> {
    Router::new().route("/stripe", post(handle_stripe_webhook))
}

/// What came of processing one event.
enum EventResult {
    Processed,
    Ignored,
    /// Stripe should deliver the event again.
    Retry(String),
}

/// Map a reconciliation result onto the webhook response. Conditions that
/// won't change on redelivery are acknowledged.
fn event_result(
    result: Result<SingleRecordOutcome, ReconcileFailure>,
    event: &StripeWebhookEvent,
) -> EventResult {
    match result {
        Ok(outcome) => {
            info!(
                event_id = %event.id,
                event_type = %event.event_type,
                subscription_id = %outcome.id,
                stripe_subscription_id = %outcome.stripe_id,
                mapped_status = %outcome.mapped_status,
                changed = outcome.changed,
                "Webhook reconciled subscription"
            );
            EventResult::Processed
        }
        Err(failure) if failure.is_retryable() => EventResult::Retry(failure.to_string()),
        Err(failure) => {
            warn!(
                event_id = %event.id,
                event_type = %event.event_type,
                reason = failure.reason(),
                "Webhook subscription not reconciled"
            );
            EventResult::Ignored
        }
    }
}

/// POST /api/webhook/stripe
async fn handle_stripe_webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let Some(webhook_secret) = app_state.config.stripe_webhook_secret.as_ref() else {
        error!("Stripe webhook secret is not configured");
        return error_json(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::InternalError,
            "Stripe webhook secret is not configured",
            None,
        );
    };

    let Some(signature) = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
    else {
        return AppError::InvalidInput("Missing Stripe signature".into()).into_response();
    };

    if let Err(e) =
        StripeClient::verify_webhook_signature(&body, signature, webhook_secret.expose_secret())
    {
        warn!(error = %e, "Webhook signature verification failed");
        return AppError::InvalidInput("Invalid signature".into()).into_response();
    }

    let event: StripeWebhookEvent = match serde_json::from_str(&body) {
        Ok(event) => event,
        Err(e) => {
            return AppError::InvalidInput(format!("Invalid webhook payload: {}", e))
                .into_response();
        }
    };

    let result = match event.event_type.as_str() {
        "customer.subscription.created"
        | "customer.subscription.updated"
        | "customer.subscription.deleted" => handle_subscription_event(&app_state, &event).await,
        "checkout.session.completed" => handle_checkout_completed(&app_state, &event).await,
        other => {
            info!(event_id = %event.id, event_type = other, "Unhandled webhook event type");
            EventResult::Ignored
        }
    };

    match result {
        EventResult::Processed | EventResult::Ignored => {
            Json(json!({ "received": true })).into_response()
        }
        EventResult::Retry(details) => {
            error!(
                event_id = %event.id,
                event_type = %event.event_type,
                error = %details,
                retryable = true,
                "Webhook processing failed, returning 500 for Stripe retry"
            );
            error_json(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::InternalError,
                "Error processing webhook",
                app_state.details(&details),
            )
        }
    }
}

async fn handle_subscription_event(app_state: &AppState, event: &StripeWebhookEvent) -> EventResult {
    let Some(subscription) = event.get_subscription() else {
        warn!(event_id = %event.id, "Subscription event without a readable subscription");
        return EventResult::Ignored;
    };

    let remote = RemoteSubscription::from(subscription);
    event_result(app_state.sync_use_cases.reconcile_remote(&remote).await, event)
}

async fn handle_checkout_completed(app_state: &AppState, event: &StripeWebhookEvent) -> EventResult {
    let Some(session) = event.get_checkout_session() else {
        warn!(event_id = %event.id, "Checkout event without a readable session");
        return EventResult::Ignored;
    };

    let user_id = session
        .client_reference_id
        .as_deref()
        .and_then(|id| Uuid::parse_str(id).ok());

    match (user_id, session.customer.as_ref()) {
        (Some(user_id), Some(customer)) => {
            if let Err(e) = app_state
                .sync_use_cases
                .link_stripe_customer(user_id, customer.id())
                .await
            {
                return EventResult::Retry(e.to_string());
            }
        }
        (None, _) => warn!(
            event_id = %event.id,
            session_id = %session.id,
            "Checkout session has no usable client_reference_id"
        ),
        (_, None) => warn!(
            event_id = %event.id,
            session_id = %session.id,
            "Checkout session has no customer"
        ),
    }

    let Some(subscription) = session.subscription.as_ref() else {
        return EventResult::Processed;
    };
    if !is_valid_subscription_id(subscription.id()) {
        warn!(
            event_id = %event.id,
            session_id = %session.id,
            "Checkout session has a malformed subscription id"
        );
        return EventResult::Ignored;
    }

    event_result(
        app_state.sync_use_cases.reconcile_one(subscription.id()).await,
        event,
    )
}
