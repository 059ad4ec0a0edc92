// SQLite connection pool setup.
//
// WAL mode plus a busy timeout is the same configuration the ancestor crate
// used; it is what makes the `UPDATE ... RETURNING` atomic-claim idiom in
// `job_repository::pop_job` safe to call from many agent-polling tasks at
// once without an application-level lock.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use testflinger_core::error::{AppError, Result};

pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    let max_connections: u32 = std::env::var("TESTFLINGER_DB_POOL_SIZE")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(20);

    let busy_timeout_secs: u64 = std::env::var("TESTFLINGER_DB_POOL_TIMEOUT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(5);

    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| AppError::Config(format!("invalid database url: {e}")))?
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(busy_timeout_secs))
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .map_err(|e| AppError::StoreUnavailable(e.to_string()))?;

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await
        .map_err(|e| AppError::StoreUnavailable(e.to_string()))?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pool_connects_to_in_memory_database() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        assert!(pool.acquire().await.is_ok());
    }
}
