//! SDK request/response types.
//!
//! Re-exports the domain's wire-shaped types (`JobSpec`, `JobState`) so
//! callers submit the same document the server persists, plus a handful of
//! thin response envelopes for the endpoints that don't just echo a `Job`.

use serde::{Deserialize, Serialize};

pub use testflinger_core::domain::{JobSpec, JobState};

/// `POST /v1/job` success response.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitJobResponse {
    pub job_id: String,
}

/// `GET /v1/job?queue=...` success response: the flattened spec plus the
/// server-assigned id.
#[derive(Debug, Clone, Deserialize)]
pub struct JobAssignment {
    pub job_id: String,
    #[serde(flatten)]
    pub spec: JobSpec,
}

/// `GET /v1/job/{id}` success response.
#[derive(Debug, Clone, Deserialize)]
pub struct JobStatus {
    pub job_id: String,
    pub job_state: String,
    #[serde(flatten)]
    pub spec: JobSpec,
}

/// Tag match mode for `GET /v1/job/search`.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TagMatch {
    Any,
    All,
}

#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub tags: Vec<String>,
    pub match_mode: Option<TagMatch>,
    pub states: Vec<String>,
}

impl SearchQuery {
    pub fn into_query_pairs(self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if !self.tags.is_empty() {
            pairs.push(("tags".to_string(), self.tags.join(",")));
        }
        if let Some(m) = self.match_mode {
            let m = match m {
                TagMatch::Any => "any",
                TagMatch::All => "all",
            };
            pairs.push(("match".to_string(), m.to_string()));
        }
        for state in self.states {
            pairs.push(("state".to_string(), state));
        }
        pairs
    }
}

/// `POST /v1/job/{id}/action` request body.
#[derive(Debug, Clone, Serialize)]
pub struct JobAction {
    pub action: String,
}

impl JobAction {
    pub fn cancel() -> Self {
        Self { action: "cancel".to_string() }
    }
}

/// `/oauth2/token`, `/oauth2/refresh` response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}
