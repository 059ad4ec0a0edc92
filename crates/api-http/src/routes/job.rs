// `/v1/job*` handlers (§4.2, §6): submission, dispatch polling, lookup,
// attachments, search, cancellation, queue position, and the status-webhook
// proxy.

use std::time::Duration;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use testflinger_core::domain::{JobSpec, JobState};
use testflinger_core::error::AppError;
use testflinger_core::port::{SearchFilter, TagMatch};

use crate::auth::context_from_headers;
use crate::blob::{stream_blob_download, stream_multipart_upload};
use crate::error::{bad_request, unprocessable, ApiResult};
use crate::state::AppState;

fn parse_job_id(raw: &str) -> ApiResult<String> {
    uuid::Uuid::parse_str(raw)
        .map(|id| id.to_string())
        .map_err(|_| bad_request(format!("'{raw}' is not a valid job id")))
}

pub async fn submit_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(spec): Json<JobSpec>,
) -> ApiResult<Json<Value>> {
    let ctx = context_from_headers(&state, &headers);
    let id = state.dispatch.submit_job(spec, &ctx).await?;
    Ok(Json(json!({ "job_id": id })))
}

#[derive(Debug, Deserialize)]
pub struct PollQuery {
    pub queue: String,
}

/// `GET /v1/job?queue=a,b`: an agent polling for work. Blocks up to
/// `long_poll_timeout` retrying the atomic pop before giving up with 204
/// (§5 Timeouts: "job poll 30s").
pub async fn poll_job(State(state): State<AppState>, Query(q): Query<PollQuery>) -> ApiResult<Response> {
    let queues: Vec<String> = q.queue.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
    if queues.is_empty() {
        return Err(bad_request("queue parameter is required"));
    }

    let deadline = tokio::time::Instant::now() + state.long_poll_timeout;
    loop {
        if let Some(job) = state.dispatch.pop_job_for_agent(&queues).await? {
            return Ok((StatusCode::OK, Json(job_response(&job))).into_response());
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(StatusCode::NO_CONTENT.into_response());
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

fn job_response(job: &testflinger_core::domain::Job) -> Value {
    let mut body = serde_json::to_value(&job.spec).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut body {
        map.insert("job_id".into(), Value::String(job.id.clone()));
        map.insert("job_state".into(), Value::String(job.state.as_str().to_string()));
    }
    body
}

pub async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Response> {
    let id = parse_job_id(&id)?;
    match state.jobs.get_job(&id).await? {
        Some(job) => Ok(Json(job_response(&job)).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

pub async fn get_attachments(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Response> {
    let id = parse_job_id(&id)?;
    stream_blob_download(&state, &format!("{id}.attachments")).await
}

pub async fn post_attachments(
    State(state): State<AppState>,
    Path(id): Path<String>,
    multipart: Multipart,
) -> ApiResult<Response> {
    let id = parse_job_id(&id)?;
    match state.dispatch.attachments_status(&id).await? {
        testflinger_core::domain::AttachmentsStatus::Waiting => {}
        _ => return Err(unprocessable(format!("job {id} is not awaiting attachments"))),
    }
    stream_multipart_upload(&state, &format!("{id}.attachments"), multipart).await?;
    state.dispatch.mark_attachments_received(&id).await?;
    Ok(StatusCode::OK.into_response())
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub tags: Option<String>,
    #[serde(rename = "match")]
    pub match_mode: Option<String>,
    pub state: Option<String>,
}

pub async fn search_jobs(State(state): State<AppState>, Query(q): Query<SearchQuery>) -> ApiResult<Response> {
    let tags: Vec<String> = q
        .tags
        .map(|t| t.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();

    let tag_match = match q.match_mode.as_deref() {
        None => None,
        Some("any") => Some(TagMatch::Any),
        Some("all") => Some(TagMatch::All),
        Some(other) => return Err(unprocessable(format!("unknown match mode '{other}'"))),
    };

    let mut states = Vec::new();
    if let Some(raw) = q.state {
        for s in raw.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()) {
            let state = JobState::parse(s).ok_or_else(|| unprocessable(format!("unknown job state '{s}'")))?;
            states.push(state);
        }
    }

    let filter = SearchFilter { tags, tag_match, states };
    let jobs = state.jobs.search(&filter).await?;
    if jobs.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    let body: Vec<Value> = jobs.iter().map(job_response).collect();
    Ok(Json(body).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub action: String,
}

pub async fn job_action(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ActionRequest>,
) -> ApiResult<Response> {
    let id = parse_job_id(&id)?;
    match body.action.as_str() {
        "cancel" => {
            state.dispatch.cancel_job(&id).await?;
            Ok(StatusCode::OK.into_response())
        }
        other => Err(unprocessable(format!("unknown action '{other}'"))),
    }
}

pub async fn job_position(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Response> {
    let id = parse_job_id(&id)?;
    if state.jobs.get_job(&id).await?.is_none() {
        return Err(bad_request(format!("job {id} not found")));
    }
    match state.jobs.position(&id).await? {
        Some(pos) => Ok(pos.to_string().into_response()),
        None => Ok((StatusCode::GONE, "gone").into_response()),
    }
}

/// `POST /v1/job/{id}/events`: proxies an agent-reported status update to
/// the job's `job_status_webhook`, if any (§4.5, §7 UpstreamTimeout).
pub async fn post_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(events): Json<Value>,
) -> ApiResult<Response> {
    let id = parse_job_id(&id)?;
    let job = state.jobs.get_job(&id).await?.ok_or_else(|| AppError::NotFound(format!("job {id} not found")))?;
    state.webhook.forward(&id, job.spec.job_status_webhook.as_deref(), &events).await;
    Ok(StatusCode::OK.into_response())
}

/// Deprecated legacy endpoints kept for back-compat (§9 open question:
/// policy on removal is deployment-specific, so both old and new paths are
/// served from the same fragment store).
pub async fn get_legacy_output(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<String> {
    let id = parse_job_id(&id)?;
    Ok(state.results.legacy_text(&id, testflinger_core::domain::LogType::Output).await?)
}

pub async fn get_legacy_serial(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<String> {
    let id = parse_job_id(&id)?;
    Ok(state.results.legacy_text(&id, testflinger_core::domain::LogType::Serial).await?)
}
