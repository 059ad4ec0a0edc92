// `/v1/client-permissions/{id}` handlers (§4.3): admin-managed per-client
// priority/queue/reservation grants.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use std::collections::HashMap;

use testflinger_core::domain::{ClientPermissions, ServerRole, TESTFLINGER_ADMIN_ID};
use testflinger_core::error::AppError;

use crate::auth::context_from_headers;
use crate::error::ApiResult;
use crate::state::AppState;

/// Wire shape for `PUT /v1/client-permissions/{id}`: callers supply a
/// plaintext secret, never a hash — the server hashes it before persisting.
#[derive(Debug, Deserialize)]
pub struct PutClientPermissionsBody {
    pub client_secret: String,
    pub role: ServerRole,
    #[serde(default)]
    pub max_priority: HashMap<String, i32>,
    #[serde(default)]
    pub allowed_queues: Vec<String>,
    #[serde(default)]
    pub max_reservation_time: HashMap<String, i64>,
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> ApiResult<()> {
    let ctx = context_from_headers(state, headers);
    if !ctx.is_authenticated || ctx.role != ServerRole::Admin {
        return Err(AppError::AuthForbidden("admin role required".into()).into());
    }
    Ok(())
}

pub async fn list(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Response> {
    require_admin(&state, &headers)?;
    Ok(Json(state.clients.get_all().await?).into_response())
}

pub async fn get(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> ApiResult<Response> {
    require_admin(&state, &headers)?;
    match state.clients.get(&id).await? {
        Some(perms) => Ok(Json(perms).into_response()),
        None => Ok(StatusCode::NOT_FOUND.into_response()),
    }
}

pub async fn put(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<PutClientPermissionsBody>,
) -> ApiResult<Response> {
    require_admin(&state, &headers)?;
    if id == TESTFLINGER_ADMIN_ID {
        return Err(AppError::AuthForbidden("the testflinger-admin client cannot be mutated".into()).into());
    }
    let secret_hash = state.hasher.hash(&body.client_secret)?;
    let perms = ClientPermissions {
        client_id: id,
        secret_hash,
        role: body.role,
        max_priority: body.max_priority,
        allowed_queues: body.allowed_queues,
        max_reservation_time: body.max_reservation_time,
    };
    state.clients.upsert(&perms).await?;
    Ok(StatusCode::OK.into_response())
}

pub async fn delete(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> ApiResult<Response> {
    require_admin(&state, &headers)?;
    if id == TESTFLINGER_ADMIN_ID {
        return Err(AppError::AuthForbidden("the testflinger-admin client cannot be deleted".into()).into());
    }
    let deleted = state.clients.delete(&id).await?;
    if !deleted {
        return Err(AppError::NotFound(format!("client {id} not found")).into());
    }
    Ok(StatusCode::OK.into_response())
}
