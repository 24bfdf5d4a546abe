use crate::app_error::{AppError, ErrorCode};
use axum::Json;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log the error before it gets converted into a status response.
        tracing::error!(error = ?self, "Request failed");

        match self {
            AppError::Database(_) => error_resp(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::DatabaseError,
                "Database operation failed",
            ),
            AppError::InvalidCredentials => error_resp(
                StatusCode::UNAUTHORIZED,
                ErrorCode::InvalidCredentials,
                "Unauthorized",
            ),
            AppError::Forbidden => {
                error_resp(StatusCode::FORBIDDEN, ErrorCode::Forbidden, "Forbidden")
            }
            AppError::InvalidInput(msg) => {
                error_resp(StatusCode::BAD_REQUEST, ErrorCode::InvalidInput, msg)
            }
            AppError::NotFound => error_resp(StatusCode::NOT_FOUND, ErrorCode::NotFound, "Not found"),
            AppError::Remote(_) => error_resp(
                StatusCode::BAD_GATEWAY,
                ErrorCode::RemoteError,
                "Stripe request failed",
            ),
            AppError::MalformedRecord(_) => error_resp(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::MalformedRecord,
                "Stored record is malformed",
            ),
            AppError::Internal(_) => error_resp(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::InternalError,
                "Internal error",
            ),
        }
    }
}

fn error_resp(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Response {
    error_json(status, code, message, None)
}

/// `{ code, message, details? }` error body. Callers decide whether `details`
/// may be shown.
pub fn error_json(
    status: StatusCode,
    code: ErrorCode,
    message: impl Into<String>,
    details: Option<String>,
) -> Response {
    let mut body = serde_json::json!({ "code": code.as_str(), "message": message.into() });
    if let Some(details) = details {
        body["details"] = serde_json::Value::String(details);
    }
    (status, Json(body)).into_response()
}
