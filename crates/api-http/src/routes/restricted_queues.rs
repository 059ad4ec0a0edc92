// `/v1/restricted-queues*` handlers (§4.1 "restricted queue check", §6):
// owner-list CRUD for queues that require explicit client membership.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use std::collections::HashMap;

use testflinger_core::domain::ServerRole;
use testflinger_core::error::AppError;

use crate::auth::context_from_headers;
use crate::error::ApiResult;
use crate::state::AppState;

fn require_manager(state: &AppState, headers: &axum::http::HeaderMap) -> ApiResult<()> {
    let ctx = context_from_headers(state, headers);
    if !ctx.is_authenticated || !testflinger_core::domain::auth::role_hierarchy_satisfied(ctx.role, ServerRole::Manager) {
        return Err(AppError::AuthForbidden("manager role required".into()).into());
    }
    Ok(())
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<HashMap<String, Vec<String>>>> {
    Ok(Json(state.queues.all_restricted().await?))
}

pub async fn owners(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(state.queues.restricted_owners(&name).await?))
}

#[derive(Debug, Deserialize)]
pub struct AddOwnerBody {
    pub client_id: String,
}

pub async fn add_owner(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Path(name): Path<String>,
    Json(body): Json<AddOwnerBody>,
) -> ApiResult<Response> {
    require_manager(&state, &headers)?;
    state.queues.add_restricted_owner(&name, &body.client_id).await?;
    Ok(StatusCode::OK.into_response())
}

pub async fn remove(State(state): State<AppState>, headers: axum::http::HeaderMap, Path(name): Path<String>) -> ApiResult<Response> {
    require_manager(&state, &headers)?;
    let removed = state.queues.remove_restricted_queue(&name).await?;
    if !removed {
        return Err(AppError::NotFound(format!("queue {name} is not restricted")).into());
    }
    Ok(StatusCode::OK.into_response())
}
