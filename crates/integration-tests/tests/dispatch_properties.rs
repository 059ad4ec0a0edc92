//! Cross-crate dispatch properties (§4.1, §4.2, §8) exercised against a real
//! SQLite pool instead of in-memory fakes: atomic claim exclusivity under
//! concurrency, priority/created_at ordering, attachment gating, and cancel
//! idempotence.

use std::sync::Arc;

use serde_json::{json, Map};
use testflinger_core::application::{AuthContext, DispatchService};
use testflinger_core::domain::{Job, JobSpec, JobState};
use testflinger_core::port::{IdProvider, JobRepository, TimeProvider};
use testflinger_infra_sqlite::{create_pool, run_migrations, SqliteJobRepository, SqliteQueueRepository};

struct SeqIds(std::sync::atomic::AtomicU64);
impl IdProvider for SeqIds {
    fn new_id(&self) -> String {
        let n = self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        format!("job-{n}")
    }
}

struct FixedClock(std::sync::atomic::AtomicI64);
impl TimeProvider for FixedClock {
    fn now_millis(&self) -> i64 {
        self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }
}

struct AllowAllSecrets;
#[async_trait::async_trait]
impl testflinger_core::port::SecretsStore for AllowAllSecrets {
    async fn read(&self, _ns: &str, _path: &str) -> Result<String, testflinger_core::port::SecretsError> {
        Ok("unused".into())
    }
    async fn write(&self, _ns: &str, _path: &str, _value: &str) -> Result<(), testflinger_core::port::SecretsError> {
        Ok(())
    }
    async fn delete(&self, _ns: &str, _path: &str) -> Result<(), testflinger_core::port::SecretsError> {
        Ok(())
    }
}

async fn dispatch_service() -> (Arc<DispatchService>, Arc<SqliteJobRepository>) {
    let pool = create_pool("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();

    let jobs = Arc::new(SqliteJobRepository::new(pool.clone()));
    let queues = Arc::new(SqliteQueueRepository::new(pool));
    let secrets: Arc<dyn testflinger_core::port::SecretsStore> = Arc::new(AllowAllSecrets);
    let ids: Arc<dyn IdProvider> = Arc::new(SeqIds(std::sync::atomic::AtomicU64::new(0)));
    let clock: Arc<dyn TimeProvider> = Arc::new(FixedClock(std::sync::atomic::AtomicI64::new(1_000)));

    let dispatch = Arc::new(DispatchService::new(jobs.clone(), queues, secrets, ids, clock));
    (dispatch, jobs)
}

fn spec(queue: &str, priority: i32) -> JobSpec {
    JobSpec {
        job_queue: queue.into(),
        job_priority: priority,
        tags: vec![],
        global_timeout: None,
        output_timeout: None,
        job_status_webhook: None,
        parent_job_id: None,
        provision_data: None,
        firmware_update_data: None,
        test_data: Some(json!({"test_cmds": "echo hi"})),
        allocate_data: None,
        reserve_data: None,
        extra: Map::new(),
    }
}

#[tokio::test]
async fn concurrent_pop_never_double_claims_a_job() {
    let (dispatch, jobs) = dispatch_service().await;
    let ctx = AuthContext::anonymous();
    dispatch.submit_job(spec("rpi4", 0), &ctx).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let dispatch = dispatch.clone();
        handles.push(tokio::spawn(async move {
            dispatch.pop_job_for_agent(&["rpi4".to_string()]).await.unwrap()
        }));
    }

    let mut claims = 0;
    for h in handles {
        if h.await.unwrap().is_some() {
            claims += 1;
        }
    }
    assert_eq!(claims, 1, "exactly one poller should have claimed the single waiting job");

    let remaining = dispatch.pop_job_for_agent(&["rpi4".to_string()]).await.unwrap();
    assert!(remaining.is_none());
    let _ = jobs;
}

#[tokio::test]
async fn pop_prefers_higher_priority_then_older_created_at() {
    let (dispatch, _jobs) = dispatch_service().await;
    let ctx = AuthContext::anonymous();

    // Submitted in low-to-high priority order; pop must still come back
    // highest-priority first regardless of submission order.
    let low = dispatch.submit_job(spec("rpi4", 0), &ctx).await.unwrap();
    let high = dispatch.submit_job(spec("rpi4", 5), &ctx).await.unwrap();
    let _mid = dispatch.submit_job(spec("rpi4", 2), &ctx).await.unwrap();

    let first = dispatch.pop_job_for_agent(&["rpi4".to_string()]).await.unwrap().unwrap();
    assert_eq!(first.id, high);

    let second = dispatch.pop_job_for_agent(&["rpi4".to_string()]).await.unwrap().unwrap();
    assert_eq!(second.id, "job-2"); // the mid-priority job, by sequential id

    let third = dispatch.pop_job_for_agent(&["rpi4".to_string()]).await.unwrap().unwrap();
    assert_eq!(third.id, low);
}

#[tokio::test]
async fn job_awaiting_attachments_is_never_popped_until_received() {
    let (dispatch, jobs) = dispatch_service().await;
    let ctx = AuthContext::anonymous();

    let mut with_attachments = spec("rpi4", 0);
    with_attachments.test_data = Some(json!({"test_cmds": "echo hi", "attachments": [{"local_file": "a.tar.gz"}]}));
    let job_id = dispatch.submit_job(with_attachments, &ctx).await.unwrap();

    assert!(dispatch.pop_job_for_agent(&["rpi4".to_string()]).await.unwrap().is_none());

    jobs.mark_attachments_received(&job_id).await.unwrap();

    let popped = dispatch.pop_job_for_agent(&["rpi4".to_string()]).await.unwrap().unwrap();
    assert_eq!(popped.id, job_id);
    assert_eq!(popped.state, JobState::Setup);
}

#[tokio::test]
async fn cancel_is_idempotent_and_rejects_once_terminal() {
    let (dispatch, _jobs) = dispatch_service().await;
    let ctx = AuthContext::anonymous();
    let job_id = dispatch.submit_job(spec("rpi4", 0), &ctx).await.unwrap();

    dispatch.cancel_job(&job_id).await.unwrap();
    let second = dispatch.cancel_job(&job_id).await;
    assert!(second.is_err(), "cancelling an already-cancelled job must surface a conflict");
}
