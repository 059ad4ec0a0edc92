// Job submission and dispatch use cases. The server never executes a job
// itself; these two calls are the entire producer/consumer contract between
// client and agent.

use crate::application::auth_service::{
    check_max_priority, check_max_reservation_timeout, check_queue_restriction, AuthContext,
};
use crate::application::secrets_resolution::resolve_secrets_for_dispatch;
use crate::domain::{AttachmentsStatus, Job, JobId, JobSpec};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, JobRepository, QueueRepository, SecretsStore, TimeProvider};
use std::sync::Arc;

pub struct DispatchService {
    jobs: Arc<dyn JobRepository>,
    queues: Arc<dyn QueueRepository>,
    secrets: Arc<dyn SecretsStore>,
    ids: Arc<dyn IdProvider>,
    clock: Arc<dyn TimeProvider>,
}

impl DispatchService {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        queues: Arc<dyn QueueRepository>,
        secrets: Arc<dyn SecretsStore>,
        ids: Arc<dyn IdProvider>,
        clock: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            jobs,
            queues,
            secrets,
            ids,
            clock,
        }
    }

    /// `POST /v1/job`: validate permissions, check referenced secret paths
    /// resolve, and persist a new job in `waiting`.
    pub async fn submit_job(&self, spec: JobSpec, ctx: &AuthContext) -> Result<JobId> {
        let queue = spec.job_queue.clone();
        if queue.trim().is_empty() {
            return Err(AppError::Validation("job_queue must not be empty".into()));
        }

        check_max_priority(spec.job_priority, &queue, ctx)?;

        let restricted = self.queues.is_restricted(&queue).await?;
        check_queue_restriction(restricted, &queue, ctx)?;

        if let Some(timeout) = spec.requested_reservation_timeout() {
            check_max_reservation_timeout(timeout, &queue, ctx)?;
        }

        let owner = if spec.secret_paths().is_empty() {
            None
        } else {
            let client_id = ctx
                .client_id
                .clone()
                .ok_or_else(|| AppError::AuthMissing("secrets require an authenticated client".into()))?;
            for path in spec.secret_paths() {
                self.secrets
                    .read(&client_id, &path)
                    .await
                    .map_err(|e| AppError::Validation(format!("secret '{path}' is not accessible: {e}")))?;
            }
            Some(client_id)
        };

        let id = self.ids.new_id();
        let now = self.clock.now_millis();
        let job = Job::new(id.clone(), now, spec, owner);
        self.jobs.add_job(&job).await?;
        Ok(id)
    }

    /// `POST /v1/job` attachment upload completing: flips `waiting` ->
    /// `complete` on the attachments flag so the job becomes dispatchable.
    pub async fn mark_attachments_received(&self, id: &JobId) -> Result<()> {
        self.jobs.mark_attachments_received(id).await
    }

    /// `GET /v1/job?queue=...`: an agent polling for work. Claims the single
    /// highest-priority dispatchable job and transitions it into `setup`.
    pub async fn pop_job_for_agent(&self, queues: &[String]) -> Result<Option<Job>> {
        let Some(mut job) = self.jobs.pop_job(queues).await? else {
            return Ok(None);
        };
        let now = self.clock.now_millis();
        job.start(now)?;
        self.jobs.set_job_state(&job.id, job.state).await?;
        resolve_secrets_for_dispatch(&mut job, &self.secrets).await;
        Ok(Some(job))
    }

    pub async fn cancel_job(&self, id: &JobId) -> Result<()> {
        let cancelled = self.jobs.cancel_job(id).await?;
        if !cancelled {
            return Err(AppError::Conflict(format!("job {id} is already in a terminal state")));
        }
        Ok(())
    }

    /// Advance a job's phase as an agent reports progress (`POST
    /// /v1/result/{id}` carries the next state alongside partial results).
    pub async fn advance_phase(&self, id: &JobId, next: crate::domain::JobState) -> Result<()> {
        let job = self
            .jobs
            .get_job(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {id} not found")))?;
        if job.state.is_terminal() {
            return Err(AppError::Conflict(format!("job {id} is already terminal")));
        }
        self.jobs.set_job_state(id, next).await?;
        Ok(())
    }

    pub async fn attachments_status(&self, id: &JobId) -> Result<AttachmentsStatus> {
        let job = self
            .jobs
            .get_job(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {id} not found")))?;
        Ok(job.attachments_status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobState, Queue};
    use async_trait::async_trait;
    use serde_json::{Map, Value};
    use std::sync::Mutex;

    struct FixedClock(i64);
    #[async_trait]
    impl TimeProvider for FixedClock {
        fn now_millis(&self) -> i64 {
            self.0
        }
    }

    struct SeqIds(Mutex<u64>);
    impl IdProvider for SeqIds {
        fn new_id(&self) -> String {
            let mut n = self.0.lock().unwrap();
            *n += 1;
            format!("job-{n}")
        }
    }

    struct NoSecrets;
    #[async_trait]
    impl SecretsStore for NoSecrets {
        async fn read(&self, _ns: &str, path: &str) -> std::result::Result<String, crate::port::SecretsError> {
            Err(crate::port::SecretsError::AccessError(path.to_string()))
        }
        async fn write(&self, _ns: &str, _path: &str, _value: &str) -> std::result::Result<(), crate::port::SecretsError> {
            Ok(())
        }
        async fn delete(&self, _ns: &str, _path: &str) -> std::result::Result<(), crate::port::SecretsError> {
            Ok(())
        }
    }

    struct OpenQueues;
    #[async_trait]
    impl QueueRepository for OpenQueues {
        async fn get_all(&self) -> Result<Vec<Queue>> {
            Ok(vec![])
        }
        async fn upsert_description(&self, _name: &str, _description: &str) -> Result<()> {
            Ok(())
        }
        async fn get_images(&self, _queue: &str) -> Result<std::collections::HashMap<String, Value>> {
            Ok(Default::default())
        }
        async fn set_images(&self, _images: &std::collections::HashMap<String, Value>) -> Result<()> {
            Ok(())
        }
        async fn is_restricted(&self, _name: &str) -> Result<bool> {
            Ok(false)
        }
        async fn restricted_owners(&self, _name: &str) -> Result<Vec<String>> {
            Ok(vec![])
        }
        async fn all_restricted(&self) -> Result<std::collections::HashMap<String, Vec<String>>> {
            Ok(Default::default())
        }
        async fn add_restricted_owner(&self, _name: &str, _client_id: &str) -> Result<()> {
            Ok(())
        }
        async fn remove_restricted_queue(&self, _name: &str) -> Result<bool> {
            Ok(true)
        }
    }

    struct InMemoryJobs(Mutex<Vec<Job>>);
    #[async_trait]
    impl JobRepository for InMemoryJobs {
        async fn add_job(&self, job: &Job) -> Result<()> {
            self.0.lock().unwrap().push(job.clone());
            Ok(())
        }
        async fn get_job(&self, id: &JobId) -> Result<Option<Job>> {
            Ok(self.0.lock().unwrap().iter().find(|j| &j.id == id).cloned())
        }
        async fn pop_job(&self, queues: &[String]) -> Result<Option<Job>> {
            let mut jobs = self.0.lock().unwrap();
            let pos = jobs
                .iter()
                .position(|j| j.is_dispatchable() && queues.contains(&j.spec.job_queue));
            Ok(pos.map(|i| jobs[i].clone()))
        }
        async fn set_job_state(&self, id: &JobId, state: JobState) -> Result<()> {
            let mut jobs = self.0.lock().unwrap();
            if let Some(j) = jobs.iter_mut().find(|j| &j.id == id) {
                j.state = state;
            }
            Ok(())
        }
        async fn cancel_job(&self, id: &JobId) -> Result<bool> {
            let mut jobs = self.0.lock().unwrap();
            if let Some(j) = jobs.iter_mut().find(|j| &j.id == id) {
                return Ok(j.cancel().is_ok());
            }
            Ok(false)
        }
        async fn add_results(&self, _id: &JobId, _partial: &Value) -> Result<()> {
            Ok(())
        }
        async fn get_result(&self, _id: &JobId) -> Result<Option<Value>> {
            Ok(None)
        }
        async fn mark_attachments_received(&self, id: &JobId) -> Result<()> {
            let mut jobs = self.0.lock().unwrap();
            if let Some(j) = jobs.iter_mut().find(|j| &j.id == id) {
                j.attachments_status = AttachmentsStatus::Complete;
            }
            Ok(())
        }
        async fn set_attachments_status(&self, id: &JobId, status: AttachmentsStatus) -> Result<()> {
            let mut jobs = self.0.lock().unwrap();
            if let Some(j) = jobs.iter_mut().find(|j| &j.id == id) {
                j.attachments_status = status;
            }
            Ok(())
        }
        async fn search(&self, _filter: &crate::port::SearchFilter) -> Result<Vec<Job>> {
            Ok(self.0.lock().unwrap().clone())
        }
        async fn position(&self, _id: &JobId) -> Result<Option<i64>> {
            Ok(None)
        }
        async fn jobs_on_queue(&self, _queue: &str) -> Result<Vec<JobId>> {
            Ok(vec![])
        }
        async fn queue_wait_samples(&self, _queues: &[String]) -> Result<Vec<(String, crate::port::WaitSample)>> {
            Ok(vec![])
        }
    }

    fn service() -> DispatchService {
        DispatchService::new(
            Arc::new(InMemoryJobs(Mutex::new(vec![]))),
            Arc::new(OpenQueues),
            Arc::new(NoSecrets),
            Arc::new(SeqIds(Mutex::new(0))),
            Arc::new(FixedClock(1_000)),
        )
    }

    fn spec(queue: &str) -> JobSpec {
        JobSpec {
            job_queue: queue.into(),
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

    #[tokio::test]
    async fn submit_then_pop_round_trips() {
        let svc = service();
        let ctx = AuthContext::anonymous();
        let id = svc.submit_job(spec("q1"), &ctx).await.unwrap();
        let popped = svc.pop_job_for_agent(&["q1".into()]).await.unwrap().unwrap();
        assert_eq!(popped.id, id);
        assert_eq!(popped.state, JobState::Setup);
    }

    #[tokio::test]
    async fn submit_rejects_empty_queue() {
        let svc = service();
        let ctx = AuthContext::anonymous();
        assert!(svc.submit_job(spec(""), &ctx).await.is_err());
    }

    #[tokio::test]
    async fn submit_rejects_unresolvable_secret_reference() {
        let svc = service();
        let mut s = spec("q1");
        s.test_data = Some(serde_json::json!({"secrets": {"a": "kv/path"}}));
        let ctx = AuthContext {
            client_id: Some("c1".into()),
            is_authenticated: true,
            ..AuthContext::anonymous()
        };
        assert!(svc.submit_job(s, &ctx).await.is_err());
    }
}
