use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::{Cookie, SameSite};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;

use crate::{
    adapters::http::{
        app_error_impl::error_json,
        app_state::AppState,
        middleware::{ADMIN_SESSION_COOKIE, AdminSession},
    },
    app_error::{AppError, AppResult, ErrorCode},
    application::{
        jwt,
        use_cases::subscription_sync::{ReconcileFailure, ReconcileSummary},
        validators::{constant_time_eq, is_valid_subscription_id},
    },
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/sync-subscriptions", post(sync_subscriptions))
        .route("/sync-stripe-subscriptions", post(sync_stripe_subscriptions))
        .route("/update-subscription", post(update_subscription))
        .route("/subscriptions", get(list_subscriptions))
        .route("/repair-account-flags", post(repair_account_flags))
}

// ============================================================================
// Session
// ============================================================================

#[derive(Deserialize)]
struct LoginPayload {
    password: String,
}

async fn login(
    State(app_state): State<AppState>,
    Json(payload): Json<LoginPayload>,
) -> AppResult<impl IntoResponse> {
    let expected = app_state.config.admin_password.expose_secret();
    if !constant_time_eq(&payload.password, expected) {
        tracing::warn!("Admin login failed");
        return Err(AppError::InvalidCredentials);
    }

    let token = jwt::issue_admin(
        &app_state.config.admin_session_secret,
        app_state.config.admin_session_ttl,
    )?;
    let cookie = Cookie::build((ADMIN_SESSION_COOKIE, token))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(app_state.config.admin_session_ttl)
        .build();

    tracing::info!("Admin logged in");
    Ok((set_cookie(cookie)?, Json(json!({ "success": true }))))
}

async fn logout() -> AppResult<impl IntoResponse> {
    let cookie = Cookie::build((ADMIN_SESSION_COOKIE, ""))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(time::Duration::seconds(0))
        .build();
    Ok((set_cookie(cookie)?, Json(json!({ "success": true }))))
}

fn set_cookie(cookie: Cookie<'_>) -> AppResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    let value = cookie
        .to_string()
        .parse()
        .map_err(|_| AppError::Internal("Invalid session cookie".into()))?;
    headers.append("set-cookie", value);
    Ok(headers)
}

// ============================================================================
// Reconciliation
// ============================================================================

/// POST /api/admin/sync-subscriptions
///
/// Stripe is only checked once there is something to reconcile.
async fn sync_subscriptions(
    _admin: AdminSession,
    State(app_state): State<AppState>,
) -> Response {
    let subscriptions = match app_state.sync_use_cases.list_linked().await {
        Ok(subscriptions) => subscriptions,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load subscriptions");
            return error_json(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::DatabaseError,
                "Failed to fetch subscriptions",
                app_state.details(&e),
            );
        }
    };

    if subscriptions.is_empty() {
        return Json(json!({
            "message": "No subscriptions to sync",
            "stats": ReconcileSummary::default(),
        }))
        .into_response();
    }

    if let Err(e) = app_state.sync_use_cases.check_source().await {
        tracing::error!(error = %e, "Stripe preflight check failed");
        return error_json(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::RemoteError,
            "Unable to connect to Stripe API",
            app_state.details(&e),
        );
    }

    let stats = app_state.sync_use_cases.reconcile_all(&subscriptions).await;
    Json(json!({ "message": "Subscription sync completed", "stats": stats })).into_response()
}

/// POST /api/admin/sync-stripe-subscriptions
async fn sync_stripe_subscriptions(
    _admin: AdminSession,
    State(app_state): State<AppState>,
) -> Response {
    match app_state.sync_use_cases.import_active().await {
        Ok(report) => {
            let message = if report.stats.total == 0 {
                "No active subscriptions found in Stripe"
            } else {
                "Stripe subscription sync completed"
            };
            Json(json!({
                "message": message,
                "stats": report.stats,
                "results": report.results,
            }))
            .into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Stripe subscription import failed");
            error_json(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::RemoteError,
                "Sync failed",
                app_state.details(&e),
            )
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateSubscriptionPayload {
    subscription_id: Option<String>,
}

/// POST /api/admin/update-subscription
async fn update_subscription(
    _admin: AdminSession,
    State(app_state): State<AppState>,
    Json(payload): Json<UpdateSubscriptionPayload>,
) -> Response {
    let subscription_id = payload
        .subscription_id
        .as_deref()
        .map(str::trim)
        .unwrap_or_default();
    if subscription_id.is_empty() {
        return AppError::InvalidInput("Subscription ID is required".into()).into_response();
    }
    if !is_valid_subscription_id(subscription_id) {
        return AppError::InvalidInput("Invalid subscription ID".into()).into_response();
    }

    match app_state.sync_use_cases.reconcile_one(subscription_id).await {
        Ok(subscription) => {
            let message = if subscription.changed {
                "Subscription updated successfully"
            } else {
                "Subscription already up to date"
            };
            Json(json!({ "message": message, "subscription": subscription })).into_response()
        }
        Err(failure) => reconcile_failure_response(&app_state, subscription_id, failure),
    }
}

fn reconcile_failure_response(
    app_state: &AppState,
    subscription_id: &str,
    failure: ReconcileFailure,
) -> Response {
    let (status, code, message) = match &failure {
        ReconcileFailure::NotFoundRemote => (
            StatusCode::NOT_FOUND,
            ErrorCode::NotFound,
            "Subscription not found in Stripe",
        ),
        ReconcileFailure::NotFoundLocal => (
            StatusCode::NOT_FOUND,
            ErrorCode::NotFound,
            "Subscription not found in database",
        ),
        ReconcileFailure::RemoteUnavailable(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::RemoteError,
            "Failed to retrieve subscription from Stripe",
        ),
        ReconcileFailure::StoreUnavailable(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::DatabaseError,
            "Failed to load subscription",
        ),
        ReconcileFailure::WriteFailed(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::DatabaseError,
            "Failed to update subscription",
        ),
    };

    tracing::warn!(
        stripe_subscription_id = subscription_id,
        reason = failure.reason(),
        error = %failure,
        "Subscription update failed"
    );

    let mut body = json!({
        "code": code.as_str(),
        "message": message,
        "reason": failure.reason(),
    });
    if let Some(details) = app_state.details(&failure) {
        body["details"] = details.into();
    }
    (status, Json(body)).into_response()
}

/// GET /api/admin/subscriptions
async fn list_subscriptions(
    _admin: AdminSession,
    State(app_state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let report = app_state.sync_use_cases.audit().await?;
    Ok(Json(report))
}

/// POST /api/admin/repair-account-flags
async fn repair_account_flags(
    _admin: AdminSession,
    State(app_state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let repaired = app_state.sync_use_cases.repair_account_flags().await?;
    Ok(Json(json!({
        "message": format!("Repaired account flags for {repaired} users"),
        "repaired": repaired,
    })))
}
