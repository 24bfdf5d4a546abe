use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::app_error::{AppError, AppResult};

pub const ADMIN_SUBJECT: &str = "admin";
pub const ADMIN_ROLE: &str = "admin";

// ============================================================================
// Admin Session Claims
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct AdminClaims {
    pub sub: String,
    pub role: String,
    pub exp: i64,
    pub iat: i64,
}

impl AdminClaims {
    pub fn is_admin(&self) -> bool {
        self.role == ADMIN_ROLE
    }
}

pub fn issue_admin(secret: &SecretString, ttl: Duration) -> AppResult<String> {
    issue(ADMIN_SUBJECT, ADMIN_ROLE, secret, ttl)
}

pub fn issue(sub: &str, role: &str, secret: &SecretString, ttl: Duration) -> AppResult<String> {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let exp = now + ttl.whole_seconds();
    let claims = AdminClaims {
        sub: sub.to_string(),
        role: role.to_string(),
        iat: now,
        exp,
    };
    let header = Header::new(Algorithm::HS256);
    encode(
        &header,
        &claims,
        &EncodingKey::from_secret(secret.expose_secret().as_bytes()),
    )
    .map_err(|e| AppError::Internal(e.to_string()))
}

/// Verify a session token. Bad signatures and expired tokens are credential errors.
pub fn verify(token: &str, secret: &SecretString) -> AppResult<AdminClaims> {
    let validation = Validation::new(Algorithm::HS256);
    decode::<AdminClaims>(
        token,
        &DecodingKey::from_secret(secret.expose_secret().as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| {
        tracing::debug!(error = %e, "Admin session token rejected");
        AppError::InvalidCredentials
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(s: &str) -> SecretString {
        SecretString::new(s.to_string().into())
    }

    #[test]
    fn test_issue_and_verify_admin_token() {
        let secret = secret("test-session-secret");
        let token = issue_admin(&secret, Duration::hours(1)).unwrap();
        let claims = verify(&token, &secret).unwrap();

        assert_eq!(claims.sub, ADMIN_SUBJECT);
        assert!(claims.is_admin());
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_verify_rejects_wrong_secret() {
        let token = issue_admin(&secret("one"), Duration::hours(1)).unwrap();
        assert!(matches!(
            verify(&token, &secret("two")),
            Err(AppError::InvalidCredentials)
        ));
    }

    #[test]
    fn test_verify_rejects_expired_token() {
        let secret = secret("test-session-secret");
        // Well past the default 60s leeway.
        let token = issue_admin(&secret, Duration::minutes(-10)).unwrap();
        assert!(matches!(
            verify(&token, &secret),
            Err(AppError::InvalidCredentials)
        ));
    }

    #[test]
    fn test_non_admin_role_is_not_admin() {
        let secret = secret("test-session-secret");
        let token = issue("viewer", "viewer", &secret, Duration::hours(1)).unwrap();
        let claims = verify(&token, &secret).unwrap();
        assert!(!claims.is_admin());
    }

    #[test]
    fn test_verify_rejects_garbage() {
        assert!(verify("not-a-jwt", &secret("s")).is_err());
    }
}
