// Retention/GC port (§4.11, supplemental - grounded in the Data Model's
// lifecycle rules which the distilled spec never assigns an owner to).

use crate::error::Result;
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct MaintenanceStats {
    pub db_size_mb: f64,
    pub db_size_bytes: i64,
    pub jobs_deleted: i64,
    pub blobs_deleted: i64,
    pub legacy_logs_deleted: i64,
    pub vacuum_run: bool,
}

#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Jobs in a terminal state older than this are deleted (§3: 7 days).
    pub job_retention_days: i64,
    /// Attachment/artifact blobs older than this are deleted (§3: 7 days).
    pub blob_retention_days: i64,
    /// Legacy stdout ring entries older than this are deleted (§3: 4 hours).
    pub legacy_log_retention_hours: i64,
    pub max_db_size_mb: f64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            job_retention_days: 7,
            blob_retention_days: 7,
            legacy_log_retention_hours: 4,
            max_db_size_mb: 1000.0,
        }
    }
}

#[async_trait]
pub trait Maintenance: Send + Sync {
    async fn vacuum(&self) -> Result<f64>;
    async fn gc_terminal_jobs(&self, retention_days: i64) -> Result<i64>;
    async fn gc_blobs(&self, retention_days: i64) -> Result<i64>;
    async fn gc_legacy_logs(&self, retention_hours: i64) -> Result<i64>;
    async fn db_size_mb(&self) -> Result<f64>;

    async fn run_full_maintenance(&self, config: &MaintenanceConfig, force_vacuum: bool) -> Result<MaintenanceStats> {
        let size_before = self.db_size_mb().await?;
        let jobs_deleted = self.gc_terminal_jobs(config.job_retention_days).await?;
        let blobs_deleted = self.gc_blobs(config.blob_retention_days).await?;
        let legacy_logs_deleted = self.gc_legacy_logs(config.legacy_log_retention_hours).await?;

        let vacuum_run = force_vacuum || size_before > config.max_db_size_mb;
        if vacuum_run {
            self.vacuum().await?;
        }
        let size_after = self.db_size_mb().await?;

        tracing::info!(
            jobs_deleted,
            blobs_deleted,
            legacy_logs_deleted,
            vacuum_run,
            db_size_mb = size_after,
            "maintenance completed"
        );

        Ok(MaintenanceStats {
            db_size_mb: size_after,
            db_size_bytes: (size_after * 1024.0 * 1024.0) as i64,
            jobs_deleted,
            blobs_deleted,
            legacy_logs_deleted,
            vacuum_run,
        })
    }
}
