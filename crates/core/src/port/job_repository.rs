// Job Repository Port (Interface)
//
// §4.1. The only hard concurrency requirement of the whole system lives
// here: `pop_next` must be a single atomic find-and-modify so that no two
// concurrent callers can ever claim the same job.

use crate::domain::{AttachmentsStatus, Job, JobId, JobState};
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;

/// How a tag filter combines multiple tags in `search`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagMatch {
    Any,
    All,
}

#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub tags: Vec<String>,
    pub tag_match: Option<TagMatch>,
    pub states: Vec<JobState>,
}

/// One observed `started_at - created_at` sample, used for percentile
/// computation in `queue_wait_times`.
#[derive(Debug, Clone, Copy)]
pub struct WaitSample {
    pub queue_wait_ms: i64,
}

#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a newly submitted job. Fails with `Conflict` if `job.id` already exists.
    async fn add_job(&self, job: &Job) -> Result<()>;

    async fn get_job(&self, id: &JobId) -> Result<Option<Job>>;

    /// Atomically claim the single highest-priority `waiting`, dispatchable
    /// job on one of `queues`, ties broken by ascending `created_at`.
    async fn pop_job(&self, queues: &[String]) -> Result<Option<Job>>;

    async fn set_job_state(&self, id: &JobId, state: JobState) -> Result<()>;

    /// CAS transition to `cancelled`; returns `false` if already terminal.
    async fn cancel_job(&self, id: &JobId) -> Result<bool>;

    /// Merge `partial` into the job's `result_data` by key.
    async fn add_results(&self, id: &JobId, partial: &Value) -> Result<()>;

    async fn get_result(&self, id: &JobId) -> Result<Option<Value>>;

    /// Flip `attachments_status` from `waiting` to `complete`.
    async fn mark_attachments_received(&self, id: &JobId) -> Result<()>;

    async fn set_attachments_status(&self, id: &JobId, status: AttachmentsStatus) -> Result<()>;

    async fn search(&self, filter: &SearchFilter) -> Result<Vec<Job>>;

    /// Zero-based position among `waiting` jobs of this job's queue, ordered
    /// by priority desc then created_at asc. `None` if no longer waiting.
    async fn position(&self, id: &JobId) -> Result<Option<i64>>;

    async fn jobs_on_queue(&self, queue: &str) -> Result<Vec<JobId>>;

    /// Wait-time samples for completed-dispatch jobs on the given queues,
    /// consumed by the percentile computation in `application::percentiles`.
    async fn queue_wait_samples(&self, queues: &[String]) -> Result<Vec<(String, WaitSample)>>;
}
