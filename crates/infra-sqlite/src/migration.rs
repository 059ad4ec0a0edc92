// Migration runner: same version-table + sequential-SQL-file shape the
// ancestor crate used, trimmed to the single schema this system needs.

use sqlx::SqlitePool;
use testflinger_core::error::{AppError, Result};
use tracing::info;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("running database migrations");

    let table_exists: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
    )
    .fetch_one(pool)
    .await
    .map_err(|e| AppError::StoreUnavailable(e.to_string()))?;

    let current_version: i64 = if table_exists > 0 {
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await
            .map_err(|e| AppError::StoreUnavailable(e.to_string()))?
            .unwrap_or(0)
    } else {
        0
    };

    info!(current_version, "schema version detected");

    if current_version < 1 {
        info!("applying migration 001: initial schema");
        apply_migration(pool, include_str!("../migrations/001_initial_schema.sql")).await?;
    }

    info!("migrations complete");
    Ok(())
}

async fn apply_migration(pool: &SqlitePool, sql: &str) -> Result<()> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| AppError::StoreUnavailable(e.to_string()))?;

    for statement in sql.split(';') {
        let clean_statement: String = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string();

        if !clean_statement.is_empty() {
            sqlx::query(&clean_statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| AppError::StoreUnavailable(format!("migration statement failed: {e}")))?;
        }
    }

    tx.commit()
        .await
        .map_err(|e| AppError::StoreUnavailable(e.to_string()))?;
    Ok(())
}
