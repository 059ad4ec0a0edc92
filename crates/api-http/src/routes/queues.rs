// `/v1/queues/*` read-only handlers (§4.2): who's listening, what's
// waiting, and how long dispatch has historically taken.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use testflinger_core::application::queue_wait_times;

use crate::error::ApiResult;
use crate::state::AppState;

pub async fn agents_on_queue(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<Json<Vec<testflinger_core::domain::AgentRecord>>> {
    Ok(Json(state.agents.agents_on_queue(&name).await?))
}

pub async fn jobs_on_queue(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(state.jobs.jobs_on_queue(&name).await?))
}

#[derive(Debug, Deserialize)]
pub struct WaitTimesQuery {
    pub queue: Option<String>,
}

pub async fn wait_times(State(state): State<AppState>, Query(q): Query<WaitTimesQuery>) -> ApiResult<Json<Value>> {
    let queues: Vec<String> = match q.queue {
        Some(raw) => raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect(),
        None => state.queues.get_all().await?.into_iter().map(|q| q.name).collect(),
    };
    let samples = state.jobs.queue_wait_samples(&queues).await?;
    let stats = queue_wait_times(&samples);
    Ok(Json(serde_json::to_value(stats).unwrap_or(Value::Null)))
}
