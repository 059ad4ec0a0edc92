// `/v1/secrets/{client_id}/{path}` handlers (§4.4): write/delete secrets
// owned by an authenticated client. Reads only happen implicitly at
// submit/dispatch time through `testflinger_core::application`, never via
// this surface.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use testflinger_core::error::AppError;
use testflinger_core::port::SecretsError;

use crate::auth::require_auth;
use crate::error::ApiResult;
use crate::state::AppState;

fn map_secrets_error(err: SecretsError) -> AppError {
    match err {
        SecretsError::AccessError(msg) => AppError::Validation(msg),
        SecretsError::StoreError(msg) | SecretsError::UnexpectedError(msg) => AppError::StoreUnavailable(msg),
    }
}

#[derive(Debug, Deserialize)]
pub struct PutSecretBody {
    pub value: String,
}

pub async fn put(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((client_id, path)): Path<(String, String)>,
    Json(body): Json<PutSecretBody>,
) -> ApiResult<Response> {
    let ctx = require_auth(&state, &headers)?;
    if ctx.client_id.as_deref() != Some(client_id.as_str()) {
        return Err(AppError::AuthForbidden("clients may only manage their own secrets".into()).into());
    }
    let store = state.secrets.as_ref().ok_or_else(|| AppError::StoreUnavailable("no secrets store configured".into()))?;
    store.write(&client_id, &path, &body.value).await.map_err(map_secrets_error)?;
    Ok(StatusCode::OK.into_response())
}

pub async fn delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((client_id, path)): Path<(String, String)>,
) -> ApiResult<Response> {
    let ctx = require_auth(&state, &headers)?;
    if ctx.client_id.as_deref() != Some(client_id.as_str()) {
        return Err(AppError::AuthForbidden("clients may only manage their own secrets".into()).into());
    }
    let store = state.secrets.as_ref().ok_or_else(|| AppError::StoreUnavailable("no secrets store configured".into()))?;
    store.delete(&client_id, &path).await.map_err(map_secrets_error)?;
    Ok(StatusCode::OK.into_response())
}
