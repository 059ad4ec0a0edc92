// SQLite-backed LogRepository (§4.5, §3.1): fragment store plus the
// deprecated legacy output/serial_output ring.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use testflinger_core::domain::{LogFragment, LogType};
use testflinger_core::error::{AppError, Result};
use testflinger_core::port::LogRepository;

pub struct SqliteLogRepository {
    pool: SqlitePool,
}

impl SqliteLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn db_err(e: sqlx::Error) -> AppError {
    AppError::StoreUnavailable(e.to_string())
}

#[async_trait]
impl LogRepository for SqliteLogRepository {
    async fn append_fragment(&self, fragment: LogFragment) -> Result<()> {
        sqlx::query(
            "INSERT INTO log_fragments (job_id, log_type, phase, fragment_number, timestamp, log_data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (job_id, log_type, phase, fragment_number) DO UPDATE SET
                log_data = excluded.log_data, timestamp = excluded.timestamp",
        )
        .bind(&fragment.job_id)
        .bind(fragment.log_type.as_str())
        .bind(&fragment.phase)
        .bind(fragment.fragment_number)
        .bind(fragment.timestamp)
        .bind(&fragment.log_data)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn fragments(
        &self,
        job_id: &str,
        log_type: Option<LogType>,
        phase: Option<&str>,
        start_fragment: Option<i64>,
        start_timestamp: Option<i64>,
    ) -> Result<Vec<LogFragment>> {
        let mut sql = String::from("SELECT * FROM log_fragments WHERE job_id = ?1");
        let mut idx = 2;
        let mut binds: Vec<String> = Vec::new();

        if let Some(lt) = log_type {
            sql.push_str(&format!(" AND log_type = ?{idx}"));
            binds.push(lt.as_str().to_string());
            idx += 1;
        }
        if let Some(p) = phase {
            sql.push_str(&format!(" AND phase = ?{idx}"));
            binds.push(p.to_string());
            idx += 1;
        }
        if let Some(sf) = start_fragment {
            sql.push_str(&format!(" AND fragment_number >= ?{idx}"));
            binds.push(sf.to_string());
            idx += 1;
        }
        if let Some(st) = start_timestamp {
            sql.push_str(&format!(" AND timestamp >= ?{idx}"));
            binds.push(st.to_string());
        }
        sql.push_str(" ORDER BY fragment_number ASC");

        let mut query = sqlx::query(&sql).bind(job_id);
        for b in &binds {
            query = query.bind(b);
        }

        let rows = query.fetch_all(&self.pool).await.map_err(db_err)?;
        rows.iter()
            .map(|r| {
                let log_type_str: String = r.try_get("log_type").map_err(db_err)?;
                Ok(LogFragment {
                    job_id: r.try_get("job_id").map_err(db_err)?,
                    log_type: LogType::parse(&log_type_str)
                        .ok_or_else(|| AppError::Internal(format!("corrupt log_type: {log_type_str}")))?,
                    phase: r.try_get("phase").map_err(db_err)?,
                    fragment_number: r.try_get("fragment_number").map_err(db_err)?,
                    timestamp: r.try_get("timestamp").map_err(db_err)?,
                    log_data: r.try_get("log_data").map_err(db_err)?,
                })
            })
            .collect()
    }

    async fn append_legacy(&self, job_id: &str, log_type: LogType, text: &str, now_millis: i64) -> Result<()> {
        sqlx::query(
            "INSERT INTO legacy_logs (job_id, log_type, text, last_write) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (job_id, log_type) DO UPDATE SET
                text = legacy_logs.text || excluded.text, last_write = excluded.last_write",
        )
        .bind(job_id)
        .bind(log_type.as_str())
        .bind(text)
        .bind(now_millis)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn take_legacy(&self, job_id: &str, log_type: LogType) -> Result<String> {
        let row = sqlx::query("SELECT text FROM legacy_logs WHERE job_id = ?1 AND log_type = ?2")
            .bind(job_id)
            .bind(log_type.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        let text = match &row {
            Some(r) => r.try_get::<String, _>("text").map_err(db_err)?,
            None => return Ok(String::new()),
        };

        sqlx::query("DELETE FROM legacy_logs WHERE job_id = ?1 AND log_type = ?2")
            .bind(job_id)
            .bind(log_type.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(text)
    }

    async fn gc_legacy(&self, older_than_millis: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM legacy_logs WHERE last_write < ?1")
            .bind(older_than_millis)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};

    async fn repo() -> SqliteLogRepository {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteLogRepository::new(pool)
    }

    fn frag(n: i64, phase: &str, data: &str) -> LogFragment {
        LogFragment { job_id: "j1".into(), log_type: LogType::Output, phase: phase.into(), fragment_number: n, timestamp: n, log_data: data.into() }
    }

    #[tokio::test]
    async fn fragments_come_back_ordered_regardless_of_insert_order() {
        let repo = repo().await;
        repo.append_fragment(frag(3, "test", "c")).await.unwrap();
        repo.append_fragment(frag(1, "test", "a")).await.unwrap();
        repo.append_fragment(frag(2, "test", "b")).await.unwrap();

        let frags = repo.fragments("j1", None, None, None, None).await.unwrap();
        let numbers: Vec<i64> = frags.iter().map(|f| f.fragment_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn legacy_log_is_consumed_on_read() {
        let repo = repo().await;
        repo.append_legacy("j1", LogType::Output, "hello ", 1000).await.unwrap();
        repo.append_legacy("j1", LogType::Output, "world", 1001).await.unwrap();
        let text = repo.take_legacy("j1", LogType::Output).await.unwrap();
        assert_eq!(text, "hello world");
        assert_eq!(repo.take_legacy("j1", LogType::Output).await.unwrap(), "");
    }

    #[tokio::test]
    async fn gc_legacy_deletes_only_old_rows() {
        let repo = repo().await;
        repo.append_legacy("old", LogType::Output, "x", 1000).await.unwrap();
        repo.append_legacy("new", LogType::Output, "y", 9000).await.unwrap();
        let deleted = repo.gc_legacy(5000).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(repo.take_legacy("new", LogType::Output).await.unwrap(), "y");
    }
}
