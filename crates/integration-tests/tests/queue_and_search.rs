//! Restricted-queue enforcement (§4.1, §4.3) and wait-time percentiles
//! (§4.6) driven by real submit/pop traffic through SQLite, rather than the
//! in-memory fakes `core`'s own unit tests use for these same rules.

use std::sync::Arc;

use serde_json::{json, Map};
use testflinger_core::application::{percentiles::queue_wait_times, AuthContext, DispatchService};
use testflinger_core::domain::{JobSpec, ServerRole};
use testflinger_core::port::{IdProvider, PermissionsClaim, QueueRepository, TimeProvider, WaitSample};
use testflinger_infra_sqlite::{create_pool, run_migrations, SqliteJobRepository, SqliteQueueRepository};

struct SeqIds(std::sync::atomic::AtomicU64);
impl IdProvider for SeqIds {
    fn new_id(&self) -> String {
        format!("job-{}", self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst))
    }
}

struct FixedClock(i64);
impl TimeProvider for FixedClock {
    fn now_millis(&self) -> i64 {
        self.0
    }
}

struct NoSecrets;
#[async_trait::async_trait]
impl testflinger_core::port::SecretsStore for NoSecrets {
    async fn read(&self, _ns: &str, _p: &str) -> Result<String, testflinger_core::port::SecretsError> {
        Err(testflinger_core::port::SecretsError::AccessError("no secrets configured".into()))
    }
    async fn write(&self, _ns: &str, _p: &str, _v: &str) -> Result<(), testflinger_core::port::SecretsError> {
        Ok(())
    }
    async fn delete(&self, _ns: &str, _p: &str) -> Result<(), testflinger_core::port::SecretsError> {
        Ok(())
    }
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
        test_data: Some(json!({"test_cmds": "echo hi"})),
        allocate_data: None,
        reserve_data: None,
        extra: Map::new(),
    }
}

#[tokio::test]
async fn restricted_queue_rejects_unlisted_clients_and_admits_owners() {
    let pool = create_pool("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();

    let jobs = Arc::new(SqliteJobRepository::new(pool.clone()));
    let queues = Arc::new(SqliteQueueRepository::new(pool));
    queues.add_restricted_owner("secure-lab", "client-a").await.unwrap();
    assert!(queues.is_restricted("secure-lab").await.unwrap());

    let secrets: Arc<dyn testflinger_core::port::SecretsStore> = Arc::new(NoSecrets);
    let ids: Arc<dyn IdProvider> = Arc::new(SeqIds(std::sync::atomic::AtomicU64::new(0)));
    let clock: Arc<dyn TimeProvider> = Arc::new(FixedClock(1_000));
    let dispatch = DispatchService::new(jobs, queues.clone(), secrets, ids, clock);

    let anonymous = AuthContext::anonymous();
    assert!(dispatch.submit_job(spec("secure-lab"), &anonymous).await.is_err());

    let owner = AuthContext {
        client_id: Some("client-a".into()),
        role: ServerRole::Contributor,
        permissions: Some(PermissionsClaim {
            client_id: "client-a".into(),
            role: ServerRole::Contributor,
            max_priority: Default::default(),
            allowed_queues: vec!["secure-lab".into()],
            max_reservation_time: Default::default(),
        }),
        is_authenticated: true,
    };
    assert!(dispatch.submit_job(spec("secure-lab"), &owner).await.is_ok());

    queues.remove_restricted_queue("secure-lab").await.unwrap();
    assert!(!queues.is_restricted("secure-lab").await.unwrap());
    assert!(dispatch.submit_job(spec("secure-lab"), &anonymous).await.is_ok());
}

#[tokio::test]
async fn wait_time_percentiles_reflect_real_pop_latency() {
    let pool = create_pool("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();
    let jobs = Arc::new(SqliteJobRepository::new(pool.clone()));
    let queues = Arc::new(SqliteQueueRepository::new(pool));
    let secrets: Arc<dyn testflinger_core::port::SecretsStore> = Arc::new(NoSecrets);
    let ids: Arc<dyn IdProvider> = Arc::new(SeqIds(std::sync::atomic::AtomicU64::new(0)));

    let mut samples = Vec::new();
    for wait_ms in [100_i64, 200, 300, 400, 500] {
        let created_at = 1_000;
        let clock: Arc<dyn TimeProvider> = Arc::new(FixedClock(created_at));
        let dispatch = DispatchService::new(jobs.clone(), queues.clone(), secrets.clone(), ids.clone(), clock);
        let job_id = dispatch.submit_job(spec("rpi4"), &AuthContext::anonymous()).await.unwrap();

        // pop_job_for_agent stamps started_at via its own clock; drive that
        // clock forward by `wait_ms` to simulate queueing delay.
        let popped_clock: Arc<dyn TimeProvider> = Arc::new(FixedClock(created_at + wait_ms));
        let popping = DispatchService::new(jobs.clone(), queues.clone(), secrets.clone(), ids.clone(), popped_clock);
        let job = popping.pop_job_for_agent(&["rpi4".to_string()]).await.unwrap().unwrap();
        assert_eq!(job.id, job_id);
        samples.push(("rpi4".to_string(), WaitSample { queue_wait_ms: wait_ms }));
    }

    let stats = queue_wait_times(&samples);
    let rpi4 = &stats["rpi4"];
    assert_eq!(rpi4.sample_count, 5);
    assert_eq!(rpi4.percentiles["p50"], 300.0);
}
