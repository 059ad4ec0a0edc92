// `/v1/result/{id}*` handlers (§4.5): result document merge/read, artifact
// upload/download, and per-phase log fragment posting/reading.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use testflinger_core::domain::{LogFragment, LogType};

use crate::blob::{stream_blob_download, stream_multipart_upload};
use crate::error::{unprocessable, ApiResult};
use crate::state::AppState;

pub async fn post_result(State(state): State<AppState>, Path(id): Path<String>, Json(partial): Json<Value>) -> ApiResult<Response> {
    state.results.add_results(&id, &partial).await?;
    Ok(StatusCode::OK.into_response())
}

pub async fn get_result(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Response> {
    match state.results.get_result(&id).await? {
        Some(result) => Ok(Json(result).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

pub async fn post_artifact(
    State(state): State<AppState>,
    Path(id): Path<String>,
    multipart: axum::extract::Multipart,
) -> ApiResult<Response> {
    stream_multipart_upload(&state, &format!("{id}.artifact"), multipart).await?;
    Ok(StatusCode::OK.into_response())
}

pub async fn get_artifact(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Response> {
    stream_blob_download(&state, &format!("{id}.artifact")).await
}

fn parse_log_type(raw: &str) -> ApiResult<LogType> {
    match raw {
        "output" => Ok(LogType::Output),
        "serial" => Ok(LogType::Serial),
        other => Err(unprocessable(format!("unknown log type '{other}'"))),
    }
}

#[derive(Debug, Deserialize)]
pub struct PostLogBody {
    pub phase: String,
    pub fragment_number: i64,
    pub log_data: String,
}

pub async fn post_log(
    State(state): State<AppState>,
    Path((id, log_type)): Path<(String, String)>,
    Json(body): Json<PostLogBody>,
) -> ApiResult<Response> {
    let log_type = parse_log_type(&log_type)?;
    let fragment = LogFragment {
        job_id: id,
        log_type,
        phase: body.phase,
        fragment_number: body.fragment_number,
        timestamp: state.clock.now_millis(),
        log_data: body.log_data,
    };
    state.results.append_fragment(fragment).await?;
    Ok(StatusCode::OK.into_response())
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub phase: Option<String>,
    pub start_fragment: Option<i64>,
    pub start_timestamp: Option<i64>,
}

pub async fn get_log(
    State(state): State<AppState>,
    Path((id, log_type)): Path<(String, String)>,
    Query(q): Query<LogQuery>,
) -> ApiResult<Response> {
    let log_type = parse_log_type(&log_type)?;
    let fragments = state
        .logs
        .fragments(&id, Some(log_type), q.phase.as_deref(), q.start_fragment, q.start_timestamp)
        .await?;
    let assembled = testflinger_core::domain::log_fragment::assemble(fragments);
    Ok(Json(assembled).into_response())
}
