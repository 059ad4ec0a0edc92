// `/v1/agents/*` handlers (§3 AgentRecord, §4.2): queue advertisement, image
// maps, agent data heartbeats, and provisioning-outcome streaks.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;
use std::collections::HashMap;

use testflinger_core::domain::ProvisionLogEntry;

use crate::error::ApiResult;
use crate::state::AppState;

pub async fn get_queues(State(state): State<AppState>) -> ApiResult<Json<Vec<Value>>> {
    let queues = state.queues.get_all().await?;
    let body = queues
        .into_iter()
        .map(|q| serde_json::json!({"name": q.name, "description": q.description}))
        .collect();
    Ok(Json(body))
}

pub async fn post_queues(State(state): State<AppState>, Json(body): Json<HashMap<String, String>>) -> ApiResult<Response> {
    for (name, description) in body {
        state.queues.upsert_description(&name, &description).await?;
    }
    Ok(StatusCode::OK.into_response())
}

pub async fn get_images(State(state): State<AppState>, Path(queue): Path<String>) -> ApiResult<Json<HashMap<String, Value>>> {
    Ok(Json(state.queues.get_images(&queue).await?))
}

pub async fn post_images(State(state): State<AppState>, Json(images): Json<HashMap<String, Value>>) -> ApiResult<Response> {
    state.queues.set_images(&images).await?;
    Ok(StatusCode::OK.into_response())
}

pub async fn get_all_agent_data(State(state): State<AppState>) -> ApiResult<Json<Vec<testflinger_core::domain::AgentRecord>>> {
    Ok(Json(state.agents.get_all().await?))
}

pub async fn get_agent_data(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<Response> {
    match state.agents.get(&name).await? {
        Some(agent) => Ok(Json(agent).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

pub async fn post_agent_data(State(state): State<AppState>, Path(name): Path<String>, Json(patch): Json<Value>) -> ApiResult<Response> {
    state.agents.upsert_patch(&name, &patch, state.clock.now_millis()).await?;
    Ok(StatusCode::OK.into_response())
}

#[derive(serde::Deserialize)]
pub struct ProvisionLogBody {
    pub job_id: Option<String>,
    pub exit_code: i32,
    #[serde(default)]
    pub detail: String,
}

pub async fn post_provision_logs(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<ProvisionLogBody>,
) -> ApiResult<Response> {
    let entry = ProvisionLogEntry {
        job_id: body.job_id,
        exit_code: body.exit_code,
        detail: body.detail,
        timestamp: state.clock.now_millis(),
    };
    state.agents.record_provision(&name, entry).await?;
    Ok(StatusCode::OK.into_response())
}
