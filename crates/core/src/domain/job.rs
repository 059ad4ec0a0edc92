// Job Domain Model

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Job ID (UUID v4, stringly typed so callers never need the uuid crate)
pub type JobId = String;

/// Job state, following the fixed phase sequence plus the two terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Setup,
    Provision,
    FirmwareUpdate,
    Test,
    Allocate,
    Allocated,
    Reserve,
    Cleanup,
    Cancelled,
    Complete,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Cancelled | JobState::Complete)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Setup => "setup",
            JobState::Provision => "provision",
            JobState::FirmwareUpdate => "firmware_update",
            JobState::Test => "test",
            JobState::Allocate => "allocate",
            JobState::Allocated => "allocated",
            JobState::Reserve => "reserve",
            JobState::Cleanup => "cleanup",
            JobState::Cancelled => "cancelled",
            JobState::Complete => "complete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "waiting" => JobState::Waiting,
            "setup" => JobState::Setup,
            "provision" => JobState::Provision,
            "firmware_update" => JobState::FirmwareUpdate,
            "test" => JobState::Test,
            "allocate" => JobState::Allocate,
            "allocated" => JobState::Allocated,
            "reserve" => JobState::Reserve,
            "cleanup" => JobState::Cleanup,
            "cancelled" => JobState::Cancelled,
            "complete" => JobState::Complete,
            _ => return None,
        })
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fixed per-job phase ordering the agent drives a job through.
pub const PHASE_SEQUENCE: &[JobState] = &[
    JobState::Setup,
    JobState::Provision,
    JobState::FirmwareUpdate,
    JobState::Test,
    JobState::Allocate,
    JobState::Reserve,
];

/// Whether a job's attachment archive has arrived yet. A job in `Waiting`
/// must never be handed to an agent (§3 invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentsStatus {
    Absent,
    Waiting,
    Complete,
}

impl AttachmentsStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttachmentsStatus::Absent => "absent",
            AttachmentsStatus::Waiting => "waiting",
            AttachmentsStatus::Complete => "complete",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "waiting" => AttachmentsStatus::Waiting,
            "complete" => AttachmentsStatus::Complete,
            _ => AttachmentsStatus::Absent,
        }
    }
}

/// Submitter-provided job description. Known fields are typed; everything
/// else round-trips through `extra` so forward-compatible clients are not
/// punished for fields this server doesn't know about yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub job_queue: String,

    #[serde(default)]
    pub job_priority: i32,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub global_timeout: Option<i64>,

    #[serde(default)]
    pub output_timeout: Option<i64>,

    #[serde(default)]
    pub job_status_webhook: Option<String>,

    #[serde(default)]
    pub parent_job_id: Option<String>,

    #[serde(default)]
    pub provision_data: Option<Value>,

    #[serde(default)]
    pub firmware_update_data: Option<Value>,

    #[serde(default)]
    pub test_data: Option<Value>,

    #[serde(default)]
    pub allocate_data: Option<Value>,

    #[serde(default)]
    pub reserve_data: Option<Value>,

    /// Any field not recognized above, preserved verbatim (Design Notes §9:
    /// reject unknown required fields, keep unknown optional ones).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobSpec {
    /// Secret references declared under `test_data.secrets`, if any.
    pub fn secret_paths(&self) -> Vec<String> {
        self.test_data
            .as_ref()
            .and_then(|d| d.get("secrets"))
            .and_then(|s| s.as_object())
            .map(|m| m.values().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default()
    }

    /// Highest priority the submitter is requesting for `queue`, used by the
    /// permission check in §4.2.
    pub fn requested_reservation_timeout(&self) -> Option<i64> {
        self.reserve_data
            .as_ref()
            .and_then(|d| d.get("timeout"))
            .and_then(|v| v.as_i64())
    }
}

/// A persisted job record (§3 Data Model).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub spec: JobSpec,
    pub state: JobState,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub attachments_status: AttachmentsStatus,
    /// Set when the job references secrets; the owner of those secrets.
    pub client_id: Option<String>,
    pub result_data: Value,
}

impl Job {
    pub fn new(id: impl Into<String>, created_at: i64, spec: JobSpec, client_id: Option<String>) -> Self {
        let attachments_status = if spec
            .test_data
            .as_ref()
            .and_then(|d| d.get("attachments"))
            .is_some()
        {
            AttachmentsStatus::Waiting
        } else {
            AttachmentsStatus::Absent
        };

        Self {
            id: id.into(),
            spec,
            state: JobState::Waiting,
            created_at,
            started_at: None,
            attachments_status,
            client_id,
            result_data: Value::Object(Map::new()),
        }
    }

    pub fn is_dispatchable(&self) -> bool {
        self.state == JobState::Waiting && self.attachments_status != AttachmentsStatus::Waiting
    }

    pub fn start(&mut self, now_millis: i64) -> crate::domain::error::Result<()> {
        if self.state != JobState::Waiting {
            return Err(crate::domain::error::DomainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: JobState::Setup.to_string(),
            });
        }
        self.state = JobState::Setup;
        self.started_at = Some(now_millis);
        Ok(())
    }

    pub fn cancel(&mut self) -> crate::domain::error::Result<()> {
        if self.state.is_terminal() {
            return Err(crate::domain::error::DomainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: JobState::Cancelled.to_string(),
            });
        }
        self.state = JobState::Cancelled;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(queue: &str) -> JobSpec {
        JobSpec {
            job_queue: queue.to_string(),
            job_priority: 0,
            tags: vec![],
            global_timeout: None,
            output_timeout: None,
            job_status_webhook: None,
            parent_job_id: None,
            provision_data: None,
            firmware_update_data: None,
            test_data: Some(serde_json::json!({"test_cmds": "echo hi"})),
            allocate_data: None,
            reserve_data: None,
            extra: Map::new(),
        }
    }

    #[test]
    fn new_job_starts_waiting_without_attachments() {
        let job = Job::new("j1", 1000, spec("q"), None);
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.attachments_status, AttachmentsStatus::Absent);
        assert!(job.is_dispatchable());
    }

    #[test]
    fn job_with_attachments_manifest_is_not_dispatchable_until_received() {
        let mut s = spec("q");
        s.test_data = Some(serde_json::json!({"attachments": [{"local": "a.tar"}]}));
        let job = Job::new("j1", 1000, s, None);
        assert_eq!(job.attachments_status, AttachmentsStatus::Waiting);
        assert!(!job.is_dispatchable());
    }

    #[test]
    fn cancel_twice_is_rejected_the_second_time() {
        let mut job = Job::new("j1", 1000, spec("q"), None);
        job.cancel().unwrap();
        assert!(job.cancel().is_err());
    }

    #[test]
    fn start_requires_waiting_state() {
        let mut job = Job::new("j1", 1000, spec("q"), None);
        job.start(2000).unwrap();
        assert_eq!(job.state, JobState::Setup);
        assert!(job.start(3000).is_err());
    }

    #[test]
    fn unknown_fields_round_trip_through_extra() {
        let raw = serde_json::json!({
            "job_queue": "q",
            "some_future_field": {"nested": true},
        });
        let parsed: JobSpec = serde_json::from_value(raw).unwrap();
        assert_eq!(
            parsed.extra.get("some_future_field"),
            Some(&serde_json::json!({"nested": true}))
        );
    }
}
