//! Testflinger dispatch server - composition root.
//!
//! Wires the sqlite-backed repository adapters, the auth/secrets
//! infrastructure, and the REST surface together, then serves `/v1/*`
//! until a shutdown signal arrives.

mod settings;
mod webhook_notifier;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use testflinger_api_http::{build_router, AppState};
use testflinger_core::application::{shutdown_channel, AuthService, DispatchService, MaintenanceScheduler, ResultsService, WebhookProxy};
use testflinger_core::port::{IdProvider, MaintenanceConfig, SecretsStore, TimeProvider};
use testflinger_core::port::{id_provider::UuidProvider, time_provider::SystemTimeProvider};
use testflinger_infra_secrets::{BcryptHasher, HttpSecretsStore, JwtTokenIssuer, SqliteSecretsStore};
use testflinger_infra_sqlite::{
    create_pool, run_migrations, SqliteAgentRepository, SqliteClientRepository, SqliteJobRepository, SqliteLogRepository,
    SqliteMaintenance, SqliteQueueRepository,
};

use webhook_notifier::ReqwestWebhookNotifier;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let config_path = std::env::var("TESTFLINGER_SERVER_CONFIG").ok().map(std::path::PathBuf::from);
    let settings = settings::ServerSettings::load(config_path.as_deref()).context("failed to load server configuration")?;

    info!(version = VERSION, bind_address = %settings.bind_address, "testflinger-server starting");

    let db_path = settings.resolved_db_path();
    info!(db_path = %db_path, "opening database");
    let pool = create_pool(&db_path).await.map_err(|e| anyhow::anyhow!("db pool creation failed: {e}"))?;
    run_migrations(&pool).await.map_err(|e| anyhow::anyhow!("migration failed: {e}"))?;

    let blob_root = settings.resolved_blob_root();
    std::fs::create_dir_all(&blob_root).context("failed to create blob store directory")?;

    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let id_provider: Arc<dyn IdProvider> = Arc::new(UuidProvider);

    let jobs = Arc::new(SqliteJobRepository::new(pool.clone()));
    let queues = Arc::new(SqliteQueueRepository::new(pool.clone()));
    let agents = Arc::new(SqliteAgentRepository::new(pool.clone()));
    let clients = Arc::new(SqliteClientRepository::new(pool.clone()));
    let logs = Arc::new(SqliteLogRepository::new(pool.clone()));
    let blobs = Arc::new(testflinger_infra_sqlite::FsBlobStore::new(blob_root));

    let secrets: Arc<dyn SecretsStore> = match (&settings.secrets_vault_url, &settings.secrets_vault_token) {
        (Some(url), Some(token)) => {
            info!(url = %url, "using external secrets vault");
            Arc::new(HttpSecretsStore::new(url.clone(), token.clone()))
        }
        _ => {
            info!("using sqlite envelope-encrypted secrets store");
            let key = secrets_encryption_key(&settings)?;
            Arc::new(SqliteSecretsStore::new(pool.clone(), &key))
        }
    };

    let jwt_secret = settings.jwt_signing_key.clone().unwrap_or_else(|| {
        tracing::warn!("JWT_SIGNING_KEY not configured; using an ephemeral development key (tokens will not survive a restart)");
        uuid::Uuid::new_v4().to_string()
    });
    let token_issuer = Arc::new(JwtTokenIssuer::new(jwt_secret.as_bytes()));
    let hasher = Arc::new(BcryptHasher);

    let dispatch = Arc::new(DispatchService::new(
        jobs.clone(),
        queues.clone(),
        secrets.clone(),
        id_provider.clone(),
        time_provider.clone(),
    ));
    let results = Arc::new(ResultsService::new(jobs.clone(), logs.clone()));
    let auth = Arc::new(AuthService::new(clients.clone(), token_issuer, hasher.clone()));
    let webhook = Arc::new(WebhookProxy::new(Arc::new(ReqwestWebhookNotifier::new())));

    let maintenance = Arc::new(SqliteMaintenance::new(pool.clone(), time_provider.clone(), blobs.clone(), logs.clone()));

    let state = AppState {
        dispatch,
        results,
        auth,
        webhook,
        jobs,
        queues,
        agents,
        clients,
        secrets: Some(secrets),
        blobs,
        logs,
        clock: time_provider,
        max_result_bytes: settings.max_result_bytes,
        long_poll_timeout: Duration::from_secs(settings.long_poll_seconds),
        hasher,
    };

    let (shutdown_tx, mut shutdown_rx) = shutdown_channel();

    let (maintenance_tx, maintenance_rx) = tokio::sync::oneshot::channel();
    let maintenance_scheduler = MaintenanceScheduler::new(
        maintenance,
        MaintenanceConfig::default(),
        Duration::from_secs(settings.maintenance_period_hours * 60 * 60),
    );
    let maintenance_handle = tokio::spawn(maintenance_scheduler.run(maintenance_rx));

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(&settings.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind_address))?;
    info!(bind_address = %settings.bind_address, "listening");

    let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
        shutdown_rx.wait().await;
    });

    tokio::select! {
        result = serve => {
            if let Err(err) = result {
                tracing::error!(error = %err, "server loop exited with an error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    shutdown_tx.shutdown();
    let _ = maintenance_tx.send(());
    let _ = tokio::time::timeout(Duration::from_secs(5), maintenance_handle).await;

    info!("shutdown complete");
    Ok(())
}

fn secrets_encryption_key(settings: &settings::ServerSettings) -> Result<[u8; 32]> {
    let raw = settings
        .secrets_encryption_key
        .clone()
        .ok_or_else(|| anyhow::anyhow!("secrets_encryption_key is required when no secrets_vault_url is configured"))?;
    let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &raw).context("secrets_encryption_key must be base64")?;
    decoded.try_into().map_err(|_| anyhow::anyhow!("secrets_encryption_key must decode to exactly 32 bytes"))
}

fn init_logging() {
    let log_format = std::env::var("TESTFLINGER_SERVER_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("testflinger=info"));

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry().with(env_filter).with(fmt::layer().json()).init();
        }
        _ => {
            tracing_subscriber::registry().with(env_filter).with(fmt::layer().pretty()).init();
        }
    }
}
