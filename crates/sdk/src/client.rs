//! Testflinger client implementation.
//!
//! A thin `reqwest` wrapper over the `/v1` REST surface (§6), used by the
//! `testflinger-cli` binary and by `crates/integration-tests`. Unlike the
//! agent's `AgentClient`, this client has no retry policy of its own — it is
//! meant for interactive and scripted use, where a failed call should
//! surface immediately rather than be silently retried.

use std::time::Duration;

use serde_json::Value;

use crate::error::{Result, SdkError};
use crate::types::{JobAction, JobAssignment, JobSpec, JobStatus, SearchQuery, SubmitJobResponse, TokenResponse};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct TestflingerClient {
    http: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl TestflingerClient {
    /// Connect to a Testflinger server at `base_url` (e.g.
    /// `http://127.0.0.1:8000`).
    pub fn connect(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(SdkError::InvalidUrl(base_url));
        }
        let http = reqwest::Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        Ok(Self { http, base_url: base_url.trim_end_matches('/').to_string(), bearer_token: None })
    }

    /// Returns a copy of this client that attaches `token` as a bearer
    /// credential on every subsequent request.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1{}", self.base_url, path)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn ok_or_rejected(resp: reqwest::Response) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status().as_u16();
            let detail = resp.text().await.unwrap_or_default();
            Err(SdkError::Rejected { status, detail })
        }
    }

    /// `POST /oauth2/token` with HTTP Basic credentials, returning the
    /// access/refresh token pair (§4.3).
    pub async fn authenticate(&self, client_id: &str, client_secret: &str) -> Result<TokenResponse> {
        let resp = self.http.post(self.url("/oauth2/token")).basic_auth(client_id, Some(client_secret)).send().await?;
        let resp = Self::ok_or_rejected(resp).await?;
        Ok(resp.json().await?)
    }

    /// `POST /v1/job`: submit a new job spec, returning its assigned id.
    pub async fn submit_job(&self, spec: &JobSpec) -> Result<String> {
        let resp = self.authed(self.http.post(self.url("/job")).json(spec)).send().await?;
        let resp = Self::ok_or_rejected(resp).await?;
        let body: SubmitJobResponse = resp.json().await?;
        Ok(body.job_id)
    }

    /// `GET /v1/job?queue=...`: claim the next waiting job on `queue`, if
    /// any (204 -> `None`).
    pub async fn poll_job(&self, queue: &str) -> Result<Option<JobAssignment>> {
        let resp = self.authed(self.http.get(self.url("/job")).query(&[("queue", queue)])).send().await?;
        if resp.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let resp = Self::ok_or_rejected(resp).await?;
        Ok(Some(resp.json().await?))
    }

    /// `GET /v1/job/{id}`: fetch a job's current spec and state.
    pub async fn get_job(&self, job_id: &str) -> Result<Option<JobStatus>> {
        let resp = self.authed(self.http.get(self.url(&format!("/job/{job_id}")))).send().await?;
        if resp.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let resp = Self::ok_or_rejected(resp).await?;
        Ok(Some(resp.json().await?))
    }

    /// `GET /v1/job/search`.
    pub async fn search_jobs(&self, query: SearchQuery) -> Result<Vec<JobStatus>> {
        let resp = self.authed(self.http.get(self.url("/job/search")).query(&query.into_query_pairs())).send().await?;
        if resp.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(vec![]);
        }
        let resp = Self::ok_or_rejected(resp).await?;
        Ok(resp.json().await?)
    }

    /// `POST /v1/job/{id}/action`, `{action: "cancel"}`.
    pub async fn cancel_job(&self, job_id: &str) -> Result<()> {
        let resp = self.authed(self.http.post(self.url(&format!("/job/{job_id}/action"))).json(&JobAction::cancel())).send().await?;
        Self::ok_or_rejected(resp).await?;
        Ok(())
    }

    /// `GET /v1/job/{id}/position`, returned as plain text in §6 but parsed
    /// here for convenience. `None` means the job is no longer waiting
    /// (server returns 410).
    pub async fn job_position(&self, job_id: &str) -> Result<Option<i64>> {
        let resp = self.authed(self.http.get(self.url(&format!("/job/{job_id}/position")))).send().await?;
        if resp.status() == reqwest::StatusCode::GONE {
            return Ok(None);
        }
        let resp = Self::ok_or_rejected(resp).await?;
        let text = resp.text().await?;
        Ok(text.trim().parse::<i64>().ok())
    }

    /// `GET /v1/result/{id}`: the assembled result document, once present.
    pub async fn get_result(&self, job_id: &str) -> Result<Option<Value>> {
        let resp = self.authed(self.http.get(self.url(&format!("/result/{job_id}")))).send().await?;
        if resp.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let resp = Self::ok_or_rejected(resp).await?;
        Ok(Some(resp.json().await?))
    }

    /// `GET /v1/result/{id}/log/output` (or `serial`), phase-filtered.
    pub async fn get_log(&self, job_id: &str, log_type: &str, phase: Option<&str>) -> Result<Value> {
        let mut req = self.http.get(self.url(&format!("/result/{job_id}/log/{log_type}")));
        if let Some(phase) = phase {
            req = req.query(&[("phase", phase)]);
        }
        let resp = self.authed(req).send().await?;
        let resp = Self::ok_or_rejected(resp).await?;
        Ok(resp.json().await?)
    }

    /// `GET /v1/queues/wait_times?queue=...`: observed percentile wait times.
    pub async fn queue_wait_times(&self, queues: &[String]) -> Result<Value> {
        let queue_param = queues.join(",");
        let resp = self.authed(self.http.get(self.url("/queues/wait_times")).query(&[("queue", &queue_param)])).send().await?;
        let resp = Self::ok_or_rejected(resp).await?;
        Ok(resp.json().await?)
    }
}
