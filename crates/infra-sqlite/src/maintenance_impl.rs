// SQLite-backed Maintenance (§4.11): terminal-job/legacy-log/blob retention
// plus VACUUM, driven by the default `run_full_maintenance` on the port.

use async_trait::async_trait;
use std::sync::Arc;
use testflinger_core::error::{AppError, Result};
use testflinger_core::port::{BlobStore, LogRepository, Maintenance, TimeProvider};
use sqlx::SqlitePool;
use tracing::info;

pub struct SqliteMaintenance {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
    blobs: Arc<dyn BlobStore>,
    logs: Arc<dyn LogRepository>,
}

impl SqliteMaintenance {
    pub fn new(
        pool: SqlitePool,
        time_provider: Arc<dyn TimeProvider>,
        blobs: Arc<dyn BlobStore>,
        logs: Arc<dyn LogRepository>,
    ) -> Self {
        Self { pool, time_provider, blobs, logs }
    }

    async fn get_db_size(&self) -> Result<f64> {
        let page_count: i64 = sqlx::query_scalar("PRAGMA page_count")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::StoreUnavailable(format!("failed to get page count: {e}")))?;
        let page_size: i64 = sqlx::query_scalar("PRAGMA page_size")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::StoreUnavailable(format!("failed to get page size: {e}")))?;

        Ok((page_count * page_size) as f64 / (1024.0 * 1024.0))
    }
}

#[async_trait]
impl Maintenance for SqliteMaintenance {
    async fn vacuum(&self) -> Result<f64> {
        let size_before = self.get_db_size().await?;
        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::StoreUnavailable(format!("VACUUM failed: {e}")))?;
        let size_after = self.get_db_size().await?;
        let reclaimed = (size_before - size_after).max(0.0);
        info!(size_before_mb = size_before, size_after_mb = size_after, reclaimed_mb = reclaimed, "vacuum completed");
        Ok(reclaimed)
    }

    async fn gc_terminal_jobs(&self, retention_days: i64) -> Result<i64> {
        let now = self.time_provider.now_millis();
        let cutoff = now - retention_days * 24 * 60 * 60 * 1000;

        let result = sqlx::query(
            "DELETE FROM jobs WHERE state IN ('cancelled', 'complete') AND created_at < ?1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::StoreUnavailable(format!("terminal job GC failed: {e}")))?;

        let deleted = result.rows_affected() as i64;
        info!(deleted_jobs = deleted, retention_days, "terminal job GC completed");
        Ok(deleted)
    }

    async fn gc_blobs(&self, retention_days: i64) -> Result<i64> {
        let now = self.time_provider.now_millis();
        let cutoff = now - retention_days * 24 * 60 * 60 * 1000;

        let stale = self.blobs.list_older_than(cutoff).await?;
        let mut deleted = 0i64;
        for key in stale {
            self.blobs.delete(&key).await?;
            deleted += 1;
        }
        info!(deleted_blobs = deleted, retention_days, "blob GC completed");
        Ok(deleted)
    }

    async fn gc_legacy_logs(&self, retention_hours: i64) -> Result<i64> {
        let now = self.time_provider.now_millis();
        let cutoff = now - retention_hours * 60 * 60 * 1000;
        let deleted = self.logs.gc_legacy(cutoff).await?;
        info!(deleted_rows = deleted, retention_hours, "legacy log GC completed");
        Ok(deleted as i64)
    }

    async fn db_size_mb(&self) -> Result<f64> {
        self.get_db_size().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations, FsBlobStore, SqliteLogRepository};
    use testflinger_core::port::time_provider::SystemTimeProvider;
    use tempfile::tempdir;

    async fn maintenance() -> SqliteMaintenance {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let dir = tempdir().unwrap();
        let blobs = Arc::new(FsBlobStore::new(dir.path().to_path_buf()));
        let logs = Arc::new(SqliteLogRepository::new(pool.clone()));
        SqliteMaintenance::new(pool, Arc::new(SystemTimeProvider), blobs, logs)
    }

    #[tokio::test]
    async fn vacuum_does_not_error_on_empty_database() {
        let maintenance = maintenance().await;
        let reclaimed = maintenance.vacuum().await.unwrap();
        assert!(reclaimed >= 0.0);
    }

    #[tokio::test]
    async fn gc_terminal_jobs_deletes_only_old_terminal_jobs() {
        let maintenance = maintenance().await;
        let now = chrono::Utc::now().timestamp_millis();
        let ten_days_ago = now - 10 * 24 * 60 * 60 * 1000;

        sqlx::query(
            "INSERT INTO jobs (id, job_queue, job_priority, state, attachments_status, created_at, spec_json)
             VALUES ('old', 'q', 0, 'complete', 'absent', ?1, '{}')",
        )
        .bind(ten_days_ago)
        .execute(&maintenance.pool)
        .await
        .unwrap();

        sqlx::query(
            "INSERT INTO jobs (id, job_queue, job_priority, state, attachments_status, created_at, spec_json)
             VALUES ('recent', 'q', 0, 'complete', 'absent', ?1, '{}')",
        )
        .bind(now)
        .execute(&maintenance.pool)
        .await
        .unwrap();

        let deleted = maintenance.gc_terminal_jobs(7).await.unwrap();
        assert_eq!(deleted, 1);
    }

    #[tokio::test]
    async fn db_size_mb_is_positive() {
        let maintenance = maintenance().await;
        assert!(maintenance.db_size_mb().await.unwrap() > 0.0);
    }
}
