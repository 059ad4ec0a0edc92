// SQLite-backed JobRepository (§4.1).
//
// `pop_job` is the one operation in this whole system with a hard
// concurrency requirement: it must be a single atomic find-and-modify. This
// is realized with `UPDATE jobs SET state = ... WHERE id = (SELECT ...
// ORDER BY ... LIMIT 1) RETURNING *`, the same atomic-claim idiom the
// ancestor crate used for its own `pop_next`; SQLite's single-writer model
// plus WAL mode (connection.rs) makes this exclusive even under many
// concurrently polling agents.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use testflinger_core::domain::{AttachmentsStatus, Job, JobId, JobSpec, JobState};
use testflinger_core::error::{AppError, Result};
use testflinger_core::port::{JobRepository, SearchFilter, TagMatch, WaitSample};

pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<Job> {
        let spec_json: String = row.try_get("spec_json").map_err(db_err)?;
        let spec: JobSpec = serde_json::from_str(&spec_json)?;
        let result_json: String = row.try_get("result_data_json").map_err(db_err)?;
        let result_data: Value = serde_json::from_str(&result_json)?;
        let state_str: String = row.try_get("state").map_err(db_err)?;
        let attachments_str: String = row.try_get("attachments_status").map_err(db_err)?;

        Ok(Job {
            id: row.try_get("id").map_err(db_err)?,
            spec,
            state: JobState::parse(&state_str)
                .ok_or_else(|| AppError::Internal(format!("corrupt job state: {state_str}")))?,
            created_at: row.try_get("created_at").map_err(db_err)?,
            started_at: row.try_get("started_at").map_err(db_err)?,
            attachments_status: AttachmentsStatus::parse(&attachments_str),
            client_id: row.try_get("client_id").map_err(db_err)?,
            result_data,
        })
    }
}

fn db_err(e: sqlx::Error) -> AppError {
    AppError::StoreUnavailable(e.to_string())
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn add_job(&self, job: &Job) -> Result<()> {
        let spec_json = serde_json::to_string(&job.spec)?;
        let result_json = serde_json::to_string(&job.result_data)?;

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            "INSERT INTO jobs (id, job_queue, job_priority, state, attachments_status, created_at, started_at, client_id, spec_json, result_data_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(&job.id)
        .bind(&job.spec.job_queue)
        .bind(job.spec.job_priority)
        .bind(job.state.as_str())
        .bind(job.attachments_status.as_str())
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(&job.client_id)
        .bind(spec_json)
        .bind(result_json)
        .execute(&mut *tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.code().as_deref() == Some("2067") => {
                AppError::Conflict(format!("job {} already exists", job.id))
            }
            other => AppError::StoreUnavailable(other.to_string()),
        })?;

        for tag in &job.spec.tags {
            sqlx::query("INSERT INTO job_tags (job_id, tag) VALUES (?1, ?2)")
                .bind(&job.id)
                .bind(tag)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn get_job(&self, id: &JobId) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn pop_job(&self, queues: &[String]) -> Result<Option<Job>> {
        if queues.is_empty() {
            return Ok(None);
        }
        let placeholders: Vec<String> = (0..queues.len()).map(|i| format!("?{}", i + 1)).collect();
        let sql = format!(
            "UPDATE jobs SET state = 'setup'
             WHERE id = (
                 SELECT id FROM jobs
                 WHERE state = 'waiting'
                   AND attachments_status != 'waiting'
                   AND job_queue IN ({})
                 ORDER BY job_priority DESC, created_at ASC
                 LIMIT 1
             )
             RETURNING *",
            placeholders.join(", ")
        );
        let mut query = sqlx::query(&sql);
        for q in queues {
            query = query.bind(q);
        }
        let row = query.fetch_optional(&self.pool).await.map_err(db_err)?;
        // The claim is already committed (state = 'setup'); hand back a job
        // that still reports `Waiting` so the caller's `Job::start()` domain
        // transition (which requires `Waiting -> Setup`) and the follow-up
        // `set_job_state` write remain meaningful, idempotent bookkeeping.
        match row {
            Some(r) => {
                let mut job = Self::row_to_job(&r)?;
                job.state = JobState::Waiting;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    async fn set_job_state(&self, id: &JobId, state: JobState) -> Result<()> {
        if state != JobState::Waiting {
            let now: i64 = sqlx::query_scalar("SELECT CAST(strftime('%s','now') AS INTEGER) * 1000")
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;
            sqlx::query("UPDATE jobs SET state = ?1, started_at = COALESCE(started_at, ?3) WHERE id = ?2")
                .bind(state.as_str())
                .bind(id)
                .bind(now)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        } else {
            sqlx::query("UPDATE jobs SET state = ?1 WHERE id = ?2")
                .bind(state.as_str())
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }
        Ok(())
    }

    async fn cancel_job(&self, id: &JobId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET state = 'cancelled' WHERE id = ?1 AND state NOT IN ('cancelled', 'complete')",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_results(&self, id: &JobId, partial: &Value) -> Result<()> {
        let row = sqlx::query("SELECT result_data_json FROM jobs WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| AppError::NotFound(format!("job {id} not found")))?;
        let existing_json: String = row.try_get("result_data_json").map_err(db_err)?;
        let mut existing: Value = serde_json::from_str(&existing_json)?;

        if let (Value::Object(base), Value::Object(incoming)) = (&mut existing, partial) {
            for (k, v) in incoming {
                base.insert(k.clone(), v.clone());
            }
        }

        let merged_json = serde_json::to_string(&existing)?;
        sqlx::query("UPDATE jobs SET result_data_json = ?1 WHERE id = ?2")
            .bind(merged_json)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn get_result(&self, id: &JobId) -> Result<Option<Value>> {
        let row = sqlx::query("SELECT result_data_json, state FROM jobs WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        let Some(row) = row else { return Ok(None) };
        let result_json: String = row.try_get("result_data_json").map_err(db_err)?;
        let state: String = row.try_get("state").map_err(db_err)?;
        let mut value: Value = serde_json::from_str(&result_json)?;
        if let Value::Object(obj) = &mut value {
            obj.insert("job_state".into(), Value::String(state));
        }
        Ok(Some(value))
    }

    async fn mark_attachments_received(&self, id: &JobId) -> Result<()> {
        sqlx::query("UPDATE jobs SET attachments_status = 'complete' WHERE id = ?1 AND attachments_status = 'waiting'")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn set_attachments_status(&self, id: &JobId, status: AttachmentsStatus) -> Result<()> {
        sqlx::query("UPDATE jobs SET attachments_status = ?1 WHERE id = ?2")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn search(&self, filter: &SearchFilter) -> Result<Vec<Job>> {
        let mut sql = String::from("SELECT DISTINCT j.* FROM jobs j");
        let mut conditions: Vec<String> = Vec::new();

        if !filter.tags.is_empty() {
            sql.push_str(" JOIN job_tags t ON t.job_id = j.id");
            let placeholders: Vec<String> = (0..filter.tags.len()).map(|i| format!("?{}", i + 1)).collect();
            conditions.push(format!("t.tag IN ({})", placeholders.join(", ")));
        }

        if !filter.states.is_empty() {
            let base = filter.tags.len();
            let placeholders: Vec<String> = (0..filter.states.len()).map(|i| format!("?{}", base + i + 1)).collect();
            conditions.push(format!("j.state IN ({})", placeholders.join(", ")));
        }

        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        let mut query = sqlx::query(&sql);
        for tag in &filter.tags {
            query = query.bind(tag);
        }
        for state in &filter.states {
            query = query.bind(state.as_str());
        }

        let rows = query.fetch_all(&self.pool).await.map_err(db_err)?;
        let mut jobs: Vec<Job> = rows.iter().map(Self::row_to_job).collect::<Result<_>>()?;

        // `match=all` cannot be expressed as a single SQL IN-clause (that's
        // OR semantics); post-filter in-process against each job's tag set.
        if matches!(filter.tag_match, Some(TagMatch::All)) && !filter.tags.is_empty() {
            jobs.retain(|j| filter.tags.iter().all(|t| j.spec.tags.contains(t)));
        }

        Ok(jobs)
    }

    async fn position(&self, id: &JobId) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT job_queue, state, job_priority, created_at FROM jobs WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        let Some(row) = row else { return Ok(None) };
        let state: String = row.try_get("state").map_err(db_err)?;
        if state != "waiting" {
            return Ok(None);
        }
        let queue: String = row.try_get("job_queue").map_err(db_err)?;
        let priority: i32 = row.try_get("job_priority").map_err(db_err)?;
        let created_at: i64 = row.try_get("created_at").map_err(db_err)?;

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs
             WHERE job_queue = ?1 AND state = 'waiting'
               AND (job_priority > ?2 OR (job_priority = ?2 AND created_at < ?3))",
        )
        .bind(&queue)
        .bind(priority)
        .bind(created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(Some(count))
    }

    async fn jobs_on_queue(&self, queue: &str) -> Result<Vec<JobId>> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM jobs WHERE job_queue = ?1")
            .bind(queue)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(ids)
    }

    async fn queue_wait_samples(&self, queues: &[String]) -> Result<Vec<(String, WaitSample)>> {
        if queues.is_empty() {
            return Ok(vec![]);
        }
        let placeholders: Vec<String> = (0..queues.len()).map(|i| format!("?{}", i + 1)).collect();
        let sql = format!(
            "SELECT job_queue, started_at, created_at FROM jobs
             WHERE job_queue IN ({}) AND started_at IS NOT NULL",
            placeholders.join(", ")
        );
        let mut query = sqlx::query(&sql);
        for q in queues {
            query = query.bind(q);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(db_err)?;
        rows.iter()
            .map(|r| {
                let queue: String = r.try_get("job_queue").map_err(db_err)?;
                let started_at: i64 = r.try_get("started_at").map_err(db_err)?;
                let created_at: i64 = r.try_get("created_at").map_err(db_err)?;
                Ok((queue, WaitSample { queue_wait_ms: started_at - created_at }))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use serde_json::{json, Map};
    use testflinger_core::port::SearchFilter;

    async fn repo() -> SqliteJobRepository {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteJobRepository::new(pool)
    }

    fn spec(queue: &str, priority: i32) -> JobSpec {
        JobSpec {
            job_queue: queue.into(),
            job_priority: priority,
            tags: vec!["rpi4".into()],
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
    async fn add_then_get_round_trips() {
        let repo = repo().await;
        let job = Job::new("j1", 1000, spec("q", 0), None);
        repo.add_job(&job).await.unwrap();
        let fetched = repo.get_job(&"j1".to_string()).await.unwrap().unwrap();
        assert_eq!(fetched.spec.job_queue, "q");
    }

    #[tokio::test]
    async fn adding_duplicate_id_conflicts() {
        let repo = repo().await;
        let job = Job::new("j1", 1000, spec("q", 0), None);
        repo.add_job(&job).await.unwrap();
        assert!(repo.add_job(&job).await.is_err());
    }

    #[tokio::test]
    async fn pop_job_orders_by_priority_then_created_at() {
        let repo = repo().await;
        repo.add_job(&Job::new("low", 1000, spec("q", 0), None)).await.unwrap();
        repo.add_job(&Job::new("high", 1001, spec("q", 200), None)).await.unwrap();
        repo.add_job(&Job::new("mid", 1002, spec("q", 100), None)).await.unwrap();

        let first = repo.pop_job(&["q".into()]).await.unwrap().unwrap();
        assert_eq!(first.id, "high");
        let second = repo.pop_job(&["q".into()]).await.unwrap().unwrap();
        assert_eq!(second.id, "mid");
        let third = repo.pop_job(&["q".into()]).await.unwrap().unwrap();
        assert_eq!(third.id, "low");
        assert!(repo.pop_job(&["q".into()]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pop_job_skips_waiting_on_attachments() {
        let repo = repo().await;
        let mut job = Job::new("j1", 1000, spec("q", 0), None);
        job.attachments_status = AttachmentsStatus::Waiting;
        repo.add_job(&job).await.unwrap();
        assert!(repo.pop_job(&["q".into()]).await.unwrap().is_none());

        repo.mark_attachments_received(&"j1".to_string()).await.unwrap();
        assert!(repo.pop_job(&["q".into()]).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn dispatch_exclusivity_under_concurrent_pop() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let repo = std::sync::Arc::new(SqliteJobRepository::new(pool));
        for i in 0..10 {
            repo.add_job(&Job::new(format!("j{i}"), 1000 + i, spec("q", 0), None))
                .await
                .unwrap();
        }

        let mut handles = vec![];
        for _ in 0..20 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move { repo.pop_job(&["q".into()]).await.unwrap() }));
        }
        let mut claimed = vec![];
        for h in handles {
            if let Some(job) = h.await.unwrap() {
                claimed.push(job.id);
            }
        }
        claimed.sort();
        claimed.dedup();
        assert_eq!(claimed.len(), 10, "every job claimed exactly once, no double dispatch");
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let repo = repo().await;
        repo.add_job(&Job::new("j1", 1000, spec("q", 0), None)).await.unwrap();
        assert!(repo.cancel_job(&"j1".to_string()).await.unwrap());
        assert!(!repo.cancel_job(&"j1".to_string()).await.unwrap());
    }

    #[tokio::test]
    async fn add_results_merges_by_key() {
        let repo = repo().await;
        repo.add_job(&Job::new("j1", 1000, spec("q", 0), None)).await.unwrap();
        repo.add_results(&"j1".to_string(), &json!({"provision_status": 0})).await.unwrap();
        repo.add_results(&"j1".to_string(), &json!({"test_status": 1})).await.unwrap();
        let result = repo.get_result(&"j1".to_string()).await.unwrap().unwrap();
        assert_eq!(result["provision_status"], 0);
        assert_eq!(result["test_status"], 1);
    }

    #[tokio::test]
    async fn position_reflects_priority_ordering() {
        let repo = repo().await;
        repo.add_job(&Job::new("a", 1000, spec("q", 0), None)).await.unwrap();
        repo.add_job(&Job::new("b", 1001, spec("q", 200), None)).await.unwrap();
        assert_eq!(repo.position(&"a".to_string()).await.unwrap(), Some(1));
        assert_eq!(repo.position(&"b".to_string()).await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn position_is_none_once_dispatched() {
        let repo = repo().await;
        repo.add_job(&Job::new("a", 1000, spec("q", 0), None)).await.unwrap();
        repo.pop_job(&["q".into()]).await.unwrap();
        repo.set_job_state(&"a".to_string(), JobState::Setup).await.unwrap();
        assert_eq!(repo.position(&"a".to_string()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn search_filters_by_tag_and_state() {
        let repo = repo().await;
        repo.add_job(&Job::new("a", 1000, spec("q", 0), None)).await.unwrap();
        let filter = SearchFilter {
            tags: vec!["rpi4".into()],
            tag_match: None,
            states: vec![JobState::Waiting],
        };
        let results = repo.search(&filter).await.unwrap();
        assert_eq!(results.len(), 1);
    }
}
