// Maps the core §7 error taxonomy onto HTTP status codes. Every handler
// returns `ApiResult<T> = Result<T, ApiError>` and lets this single impl
// decide the wire shape; no handler computes a status code itself.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use testflinger_core::error::AppError;

pub struct ApiError(pub AppError);

pub type ApiResult<T> = Result<T, ApiError>;

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            AppError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::AuthMissing(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::AuthForbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg.clone()),
            AppError::UpstreamTimeout(msg) => (StatusCode::GATEWAY_TIMEOUT, msg.clone()),
            AppError::StoreUnavailable(msg) => {
                tracing::error!(error = %msg, "store unavailable");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
            AppError::Domain(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            other => {
                tracing::error!(error = %other, "unhandled error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// 400 shorthand for malformed path parameters (bad UUID, unknown log type, ...).
/// `AppError::Conflict` already maps to 400 above; this just names the intent
/// at call sites distinctly from a domain-state conflict.
pub fn bad_request(message: impl Into<String>) -> ApiError {
    ApiError(AppError::Conflict(message.into()))
}

/// 422 shorthand for schema/semantic validation failures.
pub fn unprocessable(message: impl Into<String>) -> ApiError {
    ApiError(AppError::Validation(message.into()))
}
