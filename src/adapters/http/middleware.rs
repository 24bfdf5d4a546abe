use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use axum_extra::extract::CookieJar;

use crate::{
    adapters::http::app_state::AppState,
    app_error::AppError,
    application::jwt::{self, AdminClaims},
};

pub const ADMIN_SESSION_COOKIE: &str = "slw_admin_session";

/// A verified admin session. Extracting it rejects the request with 401 when
/// no valid token is present and 403 when the token lacks the admin role.
#[derive(Debug)]
pub struct AdminSession(pub AdminClaims);

impl FromRequestParts<AppState> for AdminSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        app_state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let token = jar
            .get(ADMIN_SESSION_COOKIE)
            .map(|c| c.value().to_owned())
            .or_else(|| bearer_token(parts))
            .ok_or(AppError::InvalidCredentials)?;

        let claims = jwt::verify(&token, &app_state.config.admin_session_secret)?;
        if !claims.is_admin() {
            tracing::warn!(sub = %claims.sub, role = %claims.role, "Non-admin session rejected");
            return Err(AppError::Forbidden);
        }

        Ok(AdminSession(claims))
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| token.to_string())
}
