// Agent-side HTTP client (§4.6): all network I/O the phase engine performs
// against the dispatch server goes through this trait. A single shared
// `reqwest::Client` (cookie jar enabled) backs the concrete implementation so
// a server fronted by a sticky-session load balancer sees one session per
// agent process, the same way the ancestor tooling's `requests.Session` did.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use testflinger_core::domain::{JobSpec, LogFragment, LogType};

use crate::error::{AgentError, Result};

const JOB_POLL_TIMEOUT: Duration = Duration::from_secs(30);
const RESULT_TIMEOUT: Duration = Duration::from_secs(30);
const ATTACHMENT_TIMEOUT: Duration = Duration::from_secs(600);
const ARTIFACT_TIMEOUT: Duration = Duration::from_secs(600);
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(3);
const LOG_POST_TIMEOUT: Duration = Duration::from_secs(60);

const RETRY_ATTEMPTS: u32 = 4;
const RETRY_BACKOFF_FACTOR: f64 = 0.3;
const RETRYABLE_STATUSES: [u16; 4] = [500, 502, 503, 504];

fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs_f64(RETRY_BACKOFF_FACTOR * 2f64.powi(attempt as i32 - 1))
}

/// A job handed back by `GET /v1/job?queue=...`: the flattened job spec plus
/// the server-assigned id and current state (§6).
#[derive(Debug, Clone, Deserialize)]
pub struct JobAssignment {
    pub job_id: String,
    #[serde(default)]
    pub job_state: Option<String>,
    #[serde(flatten)]
    pub spec: JobSpec,
}

#[async_trait]
pub trait AgentClient: Send + Sync {
    async fn check_jobs(&self, queues: &[String]) -> Result<Option<JobAssignment>>;
    async fn get_agent_data(&self, name: &str) -> Result<Value>;
    async fn post_agent_data(&self, name: &str, patch: Value) -> Result<()>;
    async fn post_job_state(&self, job_id: &str, state: &str) -> Result<()>;
    async fn post_result(&self, job_id: &str, result: Value) -> Result<()>;
    async fn get_result(&self, job_id: &str) -> Result<Option<Value>>;
    async fn check_job_state(&self, job_id: &str) -> Result<String>;
    async fn get_attachments(&self, job_id: &str, dest: &Path) -> Result<Option<PathBuf>>;
    async fn post_log(&self, job_id: &str, log_type: LogType, fragment: &LogFragment) -> Result<()>;
    async fn post_provision_log(&self, name: &str, job_id: Option<&str>, exit_code: i32, detail: &str) -> Result<()>;
    async fn post_status_update(&self, webhook: &str, events: &Value) -> Result<()>;
    async fn transmit_job_outcome(&self, rundir: &Path) -> Result<()>;
    async fn save_artifacts(&self, rundir: &Path, job_id: &str) -> Result<()>;
    async fn post_advertised_queues(&self, queues: &HashMap<String, String>) -> Result<()>;
    async fn post_advertised_images(&self, images: &HashMap<String, HashMap<String, Value>>) -> Result<()>;
    async fn is_server_reachable(&self) -> bool;
    /// Polls `is_server_reachable` with exponential backoff starting at
    /// `interval`, capped at `max`, until reachable (§4.6, §5 Backpressure).
    async fn wait_for_server_connectivity(&self, interval: Duration, max: Duration);
}

pub struct ReqwestAgentClient {
    http: reqwest::Client,
    base_url: String,
    agent_id: String,
}

impl ReqwestAgentClient {
    pub fn new(server_address: &str, agent_id: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .map_err(AgentError::Network)?;
        Ok(Self {
            http,
            base_url: server_address.trim_end_matches('/').to_string(),
            agent_id: agent_id.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1{}", self.base_url, path)
    }

    /// Issues `build()` up to `RETRY_ATTEMPTS` times, retrying on transport
    /// errors and on {500,502,503,504} with `backoff_factor`-style delays
    /// (§4.6: "retry policy of 3-5 attempts with backoff 0.3").
    async fn send_with_retry<F>(&self, timeout: Duration, build: F) -> Result<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match build().timeout(timeout).send().await {
                Ok(resp) if RETRYABLE_STATUSES.contains(&resp.status().as_u16()) && attempt < RETRY_ATTEMPTS => {
                    tokio::time::sleep(backoff_delay(attempt)).await;
                }
                Ok(resp) => return Ok(resp),
                Err(err) if attempt < RETRY_ATTEMPTS => {
                    tokio::time::sleep(backoff_delay(attempt)).await;
                    let _ = err;
                }
                Err(err) => return Err(AgentError::Network(err)),
            }
        }
    }

    fn ok_or_rejected(resp: &reqwest::Response) -> Result<()> {
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(AgentError::ServerRejected(format!("{} {}", resp.status(), resp.url())))
        }
    }

    /// §4.6 401 handling: re-register this agent by posting an empty job_id
    /// patch to its agent-data record.
    async fn reregister(&self) -> Result<()> {
        let _ = self.post_agent_data(&self.agent_id, serde_json::json!({"job_id": ""})).await;
        Ok(())
    }
}

#[async_trait]
impl AgentClient for ReqwestAgentClient {
    async fn check_jobs(&self, queues: &[String]) -> Result<Option<JobAssignment>> {
        let queue_param = queues.join(",");
        let resp = self
            .send_with_retry(JOB_POLL_TIMEOUT, || self.http.get(self.url("/job")).query(&[("queue", &queue_param)]))
            .await?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            self.reregister().await?;
            return Ok(None);
        }
        if resp.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        Self::ok_or_rejected(&resp)?;
        let assignment: JobAssignment = resp.json().await.map_err(AgentError::Network)?;
        Ok(Some(assignment))
    }

    async fn get_agent_data(&self, name: &str) -> Result<Value> {
        let resp = self
            .send_with_retry(RESULT_TIMEOUT, || self.http.get(self.url(&format!("/agents/data/{name}"))))
            .await?;
        Self::ok_or_rejected(&resp)?;
        resp.json().await.map_err(AgentError::Network)
    }

    async fn post_agent_data(&self, name: &str, patch: Value) -> Result<()> {
        let resp = self
            .send_with_retry(RESULT_TIMEOUT, || self.http.post(self.url(&format!("/agents/data/{name}"))).json(&patch))
            .await?;
        Self::ok_or_rejected(&resp)
    }

    async fn post_job_state(&self, job_id: &str, state: &str) -> Result<()> {
        let resp = self
            .send_with_retry(RESULT_TIMEOUT, || {
                self.http.post(self.url(&format!("/job/{job_id}/action"))).json(&serde_json::json!({"job_state": state}))
            })
            .await?;
        Self::ok_or_rejected(&resp)
    }

    async fn post_result(&self, job_id: &str, result: Value) -> Result<()> {
        let resp = self.send_with_retry(RESULT_TIMEOUT, || self.http.post(self.url(&format!("/result/{job_id}"))).json(&result)).await?;
        Self::ok_or_rejected(&resp)
    }

    async fn get_result(&self, job_id: &str) -> Result<Option<Value>> {
        let resp = self.send_with_retry(RESULT_TIMEOUT, || self.http.get(self.url(&format!("/result/{job_id}")))).await?;
        if resp.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        Self::ok_or_rejected(&resp)?;
        Ok(Some(resp.json().await.map_err(AgentError::Network)?))
    }

    async fn check_job_state(&self, job_id: &str) -> Result<String> {
        let resp = self.send_with_retry(RESULT_TIMEOUT, || self.http.get(self.url(&format!("/job/{job_id}")))).await?;
        if resp.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok("gone".to_string());
        }
        Self::ok_or_rejected(&resp)?;
        let body: Value = resp.json().await.map_err(AgentError::Network)?;
        Ok(body.get("job_state").and_then(Value::as_str).unwrap_or("unknown").to_string())
    }

    async fn get_attachments(&self, job_id: &str, dest: &Path) -> Result<Option<PathBuf>> {
        let resp = self
            .send_with_retry(ATTACHMENT_TIMEOUT, || self.http.get(self.url(&format!("/job/{job_id}/attachments"))))
            .await?;
        if resp.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        Self::ok_or_rejected(&resp)?;
        let bytes = resp.bytes().await.map_err(AgentError::Network)?;
        let archive_path = dest.join("attachments.tar.gz");
        tokio::fs::write(&archive_path, &bytes).await?;
        Ok(Some(archive_path))
    }

    async fn post_log(&self, job_id: &str, log_type: LogType, fragment: &LogFragment) -> Result<()> {
        let resp = self
            .send_with_retry(LOG_POST_TIMEOUT, || {
                self.http.post(self.url(&format!("/result/{job_id}/log/{}", log_type.as_str()))).json(fragment)
            })
            .await?;
        Self::ok_or_rejected(&resp)
    }

    async fn post_provision_log(&self, name: &str, job_id: Option<&str>, exit_code: i32, detail: &str) -> Result<()> {
        let body = serde_json::json!({"job_id": job_id, "exit_code": exit_code, "detail": detail});
        let resp = self
            .send_with_retry(RESULT_TIMEOUT, || self.http.post(self.url(&format!("/agents/provision_logs/{name}"))).json(&body))
            .await?;
        Self::ok_or_rejected(&resp)
    }

    async fn post_status_update(&self, webhook: &str, events: &Value) -> Result<()> {
        let resp = self
            .send_with_retry(WEBHOOK_TIMEOUT, || self.http.post(webhook).json(events))
            .await?;
        Self::ok_or_rejected(&resp)
    }

    async fn transmit_job_outcome(&self, rundir: &Path) -> Result<()> {
        let job_id = rundir
            .file_name()
            .and_then(|s| s.to_str())
            .ok_or_else(|| AgentError::Config(format!("rundir {} has no job id component", rundir.display())))?
            .to_string();

        let outcome_path = rundir.join("testflinger-outcome.json");
        let raw = tokio::fs::read(&outcome_path).await?;
        let mut outcome: Value = serde_json::from_slice(&raw)?;
        if let Value::Object(ref mut map) = outcome {
            map.insert("job_state".into(), Value::String("complete".into()));
        }

        self.post_result(&job_id, outcome).await?;
        self.save_artifacts(rundir, &job_id).await?;

        tokio::fs::remove_file(&outcome_path).await.ok();
        tokio::fs::remove_dir_all(rundir).await.ok();
        Ok(())
    }

    async fn save_artifacts(&self, rundir: &Path, job_id: &str) -> Result<()> {
        let artifacts_dir = rundir.join("artifacts");
        if !artifacts_dir.is_dir() {
            return Ok(());
        }

        let gz_path = rundir.join("artifacts.tar.gz");
        let artifacts_dir = artifacts_dir.clone();
        let gz_path_for_build = gz_path.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let file = std::fs::File::create(&gz_path_for_build)?;
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            let mut builder = tar::Builder::new(encoder);
            builder.append_dir_all("artifacts", &artifacts_dir)?;
            builder.into_inner()?.finish()?;
            Ok(())
        })
        .await
        .map_err(|e| AgentError::Config(format!("artifact packing task panicked: {e}")))??;

        let bytes = tokio::fs::read(&gz_path).await?;
        let part = reqwest::multipart::Part::bytes(bytes).file_name("artifacts.tar.gz");
        let form = reqwest::multipart::Form::new().part("file", part);

        let resp = self
            .http
            .post(self.url(&format!("/result/{job_id}/artifact")))
            .multipart(form)
            .timeout(ARTIFACT_TIMEOUT)
            .send()
            .await
            .map_err(AgentError::Network)?;
        Self::ok_or_rejected(&resp)?;
        tokio::fs::remove_file(&gz_path).await.ok();
        Ok(())
    }

    async fn post_advertised_queues(&self, queues: &HashMap<String, String>) -> Result<()> {
        let resp = self.send_with_retry(RESULT_TIMEOUT, || self.http.post(self.url("/agents/queues")).json(queues)).await?;
        Self::ok_or_rejected(&resp)
    }

    async fn post_advertised_images(&self, images: &HashMap<String, HashMap<String, Value>>) -> Result<()> {
        let resp = self.send_with_retry(RESULT_TIMEOUT, || self.http.post(self.url("/agents/images")).json(images)).await?;
        Self::ok_or_rejected(&resp)
    }

    async fn is_server_reachable(&self) -> bool {
        self.http
            .get(self.url("/queues/wait_times"))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok()
    }

    async fn wait_for_server_connectivity(&self, interval: Duration, max: Duration) {
        let mut delay = interval;
        while !self.is_server_reachable().await {
            tokio::time::sleep(delay).await;
            delay = std::cmp::min(delay * 2, max);
        }
    }
}
