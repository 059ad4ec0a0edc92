// Request-scoped auth context construction (§4.3, Design Notes §9: explicit
// context threaded through handlers, never a thread-local).

use axum::http::HeaderMap;
use base64::Engine;
use testflinger_core::application::AuthContext;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Builds an `AuthContext` from the `Authorization: Bearer <token>` header,
/// if present. A missing or invalid token yields an anonymous context rather
/// than an error — most endpoints only need auth for priority/role checks
/// and fall back to the anonymous path (§4.2).
pub fn context_from_headers(state: &AppState, headers: &HeaderMap) -> AuthContext {
    let Some(value) = headers.get(axum::http::header::AUTHORIZATION) else {
        return AuthContext::anonymous();
    };
    let Ok(raw) = value.to_str() else {
        return AuthContext::anonymous();
    };
    state.auth.decode_bearer(raw, state.clock.now_millis())
}

/// Same as `context_from_headers` but requires a valid token, for endpoints
/// that are meaningless anonymously (e.g. `/secrets/{client_id}/...`).
pub fn require_auth(state: &AppState, headers: &HeaderMap) -> ApiResult<AuthContext> {
    let ctx = context_from_headers(state, headers);
    if !ctx.is_authenticated {
        return Err(ApiError(testflinger_core::error::AppError::AuthMissing(
            "authentication required".into(),
        )));
    }
    Ok(ctx)
}

/// Decodes HTTP Basic credentials (`client_id:client_secret`) used by
/// `POST /oauth2/token` (§4.3).
pub fn decode_basic(headers: &HeaderMap) -> ApiResult<(String, String)> {
    let value = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or_else(|| ApiError(testflinger_core::error::AppError::AuthMissing("missing Authorization header".into())))?;
    let raw = value
        .to_str()
        .map_err(|_| ApiError(testflinger_core::error::AppError::AuthMissing("malformed Authorization header".into())))?;
    let encoded = raw
        .strip_prefix("Basic ")
        .ok_or_else(|| ApiError(testflinger_core::error::AppError::AuthMissing("expected Basic auth".into())))?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| ApiError(testflinger_core::error::AppError::AuthMissing("malformed Basic credentials".into())))?;
    let text = String::from_utf8(decoded)
        .map_err(|_| ApiError(testflinger_core::error::AppError::AuthMissing("malformed Basic credentials".into())))?;
    let (client_id, secret) = text
        .split_once(':')
        .ok_or_else(|| ApiError(testflinger_core::error::AppError::AuthMissing("malformed Basic credentials".into())))?;
    Ok((client_id.to_string(), secret.to_string()))
}
