// `/v1/oauth2/*` handlers (§4.3): client-credential exchange, refresh, and
// admin-triggered revocation.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use testflinger_core::domain::ServerRole;
use testflinger_core::error::AppError;

use crate::auth::{context_from_headers, decode_basic};
use crate::error::ApiResult;
use crate::state::AppState;

/// `POST /v1/oauth2/token`: HTTP Basic `client_id:client_secret` exchanged
/// for an (access_token, refresh_token) pair.
pub async fn token(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Response> {
    let (client_id, secret) = decode_basic(&headers)?;
    let perms = state.auth.verify_client_secret(&client_id, &secret).await?;
    let now = state.clock.now_millis();
    let (access, refresh) = state.auth.issue_tokens(&perms, now).await?;
    Ok(Json(json!({
        "access_token": access,
        "refresh_token": refresh,
        "token_type": "bearer",
    }))
    .into_response())
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

pub async fn refresh(State(state): State<AppState>, Json(body): Json<RefreshRequest>) -> ApiResult<Response> {
    let now = state.clock.now_millis();
    let access = state.auth.refresh_access_token(&body.refresh_token, now).await?;
    Ok(Json(json!({ "access_token": access, "token_type": "bearer" })).into_response())
}

#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    pub refresh_token: String,
}

/// Admin-only: revoke an arbitrary refresh token (original_source supports
/// operators force-logging-out a compromised client).
pub async fn revoke(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<RevokeRequest>) -> ApiResult<Response> {
    let ctx = context_from_headers(&state, &headers);
    if !ctx.is_authenticated || ctx.role != ServerRole::Admin {
        return Err(AppError::AuthForbidden("admin role required".into()).into());
    }
    let revoked = state.auth.revoke_refresh_token(&body.refresh_token).await?;
    if !revoked {
        return Err(AppError::NotFound("unknown refresh token".into()).into());
    }
    Ok(StatusCode::OK.into_response())
}
