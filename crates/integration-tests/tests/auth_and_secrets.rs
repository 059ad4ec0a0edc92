//! AuthService token issuance/refresh/revoke round trips (§4.3) and the two
//! distinct secrets-resolution moments (§4.2, §4.4) against real SQLite +
//! envelope-encryption adapters, not fakes.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Map};
use testflinger_core::application::secrets_resolution::resolve_secrets_for_dispatch;
use testflinger_core::application::AuthService;
use testflinger_core::domain::{ClientPermissions, Job, JobSpec, ServerRole};
use testflinger_core::port::{ClientRepository, PasswordHasher, SecretsStore, TokenIssuer};
use testflinger_infra_secrets::{BcryptHasher, JwtTokenIssuer, SqliteSecretsStore};
use testflinger_infra_sqlite::{create_pool, run_migrations, SqliteClientRepository};

async fn auth_service() -> (Arc<AuthService>, Arc<SqliteClientRepository>, Arc<dyn PasswordHasher>) {
    let pool = create_pool("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();

    let clients = Arc::new(SqliteClientRepository::new(pool));
    let tokens: Arc<dyn TokenIssuer> = Arc::new(JwtTokenIssuer::new(b"integration-test-secret"));
    let hasher: Arc<dyn PasswordHasher> = Arc::new(BcryptHasher);

    let auth = Arc::new(AuthService::new(clients.clone(), tokens, hasher.clone()));
    (auth, clients, hasher)
}

fn contributor(client_id: &str, secret_hash: String) -> ClientPermissions {
    ClientPermissions {
        client_id: client_id.into(),
        secret_hash,
        role: ServerRole::Contributor,
        max_priority: HashMap::from([("*".to_string(), 3)]),
        allowed_queues: vec!["rpi4".into()],
        max_reservation_time: HashMap::new(),
    }
}

fn admin(client_id: &str, secret_hash: String) -> ClientPermissions {
    ClientPermissions {
        client_id: client_id.into(),
        secret_hash,
        role: ServerRole::Admin,
        max_priority: HashMap::from([("*".to_string(), 100)]),
        allowed_queues: vec![],
        max_reservation_time: HashMap::new(),
    }
}

#[tokio::test]
async fn verify_issue_refresh_and_revoke_round_trip() {
    let (auth, clients, hasher) = auth_service().await;
    let hash = hasher.hash("s3cr3t").unwrap();
    clients.upsert(&contributor("client-a", hash)).await.unwrap();

    let perms = auth.verify_client_secret("client-a", "s3cr3t").await.unwrap();
    assert_eq!(perms.role, ServerRole::Contributor);
    assert!(auth.verify_client_secret("client-a", "wrong").await.is_err());

    let now = 1_700_000_000_000;
    let (access, refresh) = auth.issue_tokens(&perms, now).await.unwrap();
    let ctx = auth.decode_bearer(&format!("Bearer {access}"), now);
    assert!(ctx.is_authenticated);
    assert_eq!(ctx.client_id.as_deref(), Some("client-a"));

    let refreshed_access = auth.refresh_access_token(&refresh, now + 1_000).await.unwrap();
    let ctx2 = auth.decode_bearer(&refreshed_access, now + 1_000);
    assert!(ctx2.is_authenticated);

    assert!(auth.revoke_refresh_token(&refresh).await.unwrap());
    assert!(auth.refresh_access_token(&refresh, now + 2_000).await.is_err());
}

#[tokio::test]
async fn admin_and_manager_refresh_tokens_never_expire() {
    let (auth, clients, hasher) = auth_service().await;
    let hash = hasher.hash("topsecret").unwrap();
    clients.upsert(&admin("testflinger-admin", hash)).await.unwrap();

    let perms = auth.verify_client_secret("testflinger-admin", "topsecret").await.unwrap();
    let now = 1_700_000_000_000;
    let (_access, refresh) = auth.issue_tokens(&perms, now).await.unwrap();

    // Far beyond the 30-day non-admin lifetime; an admin's refresh token
    // must still be valid because it was minted with no expiry.
    let far_future = now + 365 * 24 * 60 * 60 * 1000;
    assert!(auth.refresh_access_token(&refresh, far_future).await.is_ok());
}

#[tokio::test]
async fn submission_time_and_dispatch_time_secret_resolution_diverge_on_deletion() {
    let pool = create_pool("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();
    let store: Arc<dyn SecretsStore> = Arc::new(SqliteSecretsStore::new(pool, &[3u8; 32]));

    store.write("client-a", "kv/wifi_password", "hunter2").await.unwrap();

    let spec = JobSpec {
        job_queue: "rpi4".into(),
        job_priority: 0,
        tags: vec![],
        global_timeout: None,
        output_timeout: None,
        job_status_webhook: None,
        parent_job_id: None,
        provision_data: None,
        firmware_update_data: None,
        test_data: Some(json!({"secrets": {"wifi": "kv/wifi_password"}})),
        allocate_data: None,
        reserve_data: None,
        extra: Map::new(),
    };
    assert!(store.read("client-a", &spec.secret_paths()[0]).await.is_ok());

    let mut job = Job::new("job-1", 0, spec, Some("client-a".into()));
    resolve_secrets_for_dispatch(&mut job, &store).await;
    assert_eq!(job.spec.test_data.as_ref().unwrap()["secrets"]["wifi"], "hunter2");

    // Secret is deleted between submission and a later re-dispatch (e.g.
    // after a crash-recovery requeue); resolution must degrade to an empty
    // string rather than failing the dispatch.
    store.delete("client-a", "kv/wifi_password").await.unwrap();
    let mut job2 = Job::new("job-2", 0, job.spec.clone(), Some("client-a".into()));
    resolve_secrets_for_dispatch(&mut job2, &store).await;
    assert_eq!(job2.spec.test_data.as_ref().unwrap()["secrets"]["wifi"], "");
}
