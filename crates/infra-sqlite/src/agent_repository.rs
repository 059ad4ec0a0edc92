// SQLite-backed AgentRepository (§3, §4.2).

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use std::collections::VecDeque;
use testflinger_core::domain::{AgentRecord, AgentState, ProvisionLogEntry, StreakType};
use testflinger_core::error::{AppError, Result};
use testflinger_core::port::AgentRepository;

pub struct SqliteAgentRepository {
    pool: SqlitePool,
}

impl SqliteAgentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_agent(row: &sqlx::sqlite::SqliteRow) -> Result<AgentRecord> {
        let state_str: String = row.try_get("state").map_err(db_err)?;
        let queues_json: String = row.try_get("queues_json").map_err(db_err)?;
        let log_json: String = row.try_get("log_json").map_err(db_err)?;
        let provision_log_json: String = row.try_get("provision_log_json").map_err(db_err)?;
        let streak_type: Option<String> = row.try_get("provision_streak_type").map_err(db_err)?;

        let log: Vec<String> = serde_json::from_str(&log_json)?;
        let provision_log: Vec<ProvisionLogEntry> = serde_json::from_str(&provision_log_json)?;

        Ok(AgentRecord {
            name: row.try_get("name").map_err(db_err)?,
            state: AgentState::parse(&state_str),
            queues: serde_json::from_str(&queues_json)?,
            location: row.try_get("location").map_err(db_err)?,
            job_id: row.try_get("job_id").map_err(db_err)?,
            last_updated: row.try_get("last_updated").map_err(db_err)?,
            log: VecDeque::from(log),
            provision_log: VecDeque::from(provision_log),
            provision_streak_type: streak_type.as_deref().map(|s| match s {
                "pass" => StreakType::Pass,
                _ => StreakType::Fail,
            }),
            provision_streak_count: row.try_get("provision_streak_count").map_err(db_err)?,
        })
    }

    async fn load_or_new(&self, name: &str, now_millis: i64) -> Result<AgentRecord> {
        let row = sqlx::query("SELECT * FROM agents WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        match row {
            Some(r) => Self::row_to_agent(&r),
            None => Ok(AgentRecord::new(name, now_millis)),
        }
    }

    async fn save(&self, agent: &AgentRecord) -> Result<()> {
        let queues_json = serde_json::to_string(&agent.queues)?;
        let log_json = serde_json::to_string(&agent.log.iter().collect::<Vec<_>>())?;
        let provision_log_json = serde_json::to_string(&agent.provision_log.iter().collect::<Vec<_>>())?;
        let streak_type = agent.provision_streak_type.map(|t| match t {
            StreakType::Pass => "pass",
            StreakType::Fail => "fail",
        });

        sqlx::query(
            "INSERT INTO agents (name, state, queues_json, location, job_id, last_updated, log_json, provision_log_json, provision_streak_type, provision_streak_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT (name) DO UPDATE SET
                state = excluded.state,
                queues_json = excluded.queues_json,
                location = excluded.location,
                job_id = excluded.job_id,
                last_updated = excluded.last_updated,
                log_json = excluded.log_json,
                provision_log_json = excluded.provision_log_json,
                provision_streak_type = excluded.provision_streak_type,
                provision_streak_count = excluded.provision_streak_count",
        )
        .bind(&agent.name)
        .bind(agent.state.as_str())
        .bind(queues_json)
        .bind(&agent.location)
        .bind(&agent.job_id)
        .bind(agent.last_updated)
        .bind(log_json)
        .bind(provision_log_json)
        .bind(streak_type)
        .bind(agent.provision_streak_count)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

fn db_err(e: sqlx::Error) -> AppError {
    AppError::StoreUnavailable(e.to_string())
}

#[async_trait]
impl AgentRepository for SqliteAgentRepository {
    async fn get(&self, name: &str) -> Result<Option<AgentRecord>> {
        let row = sqlx::query("SELECT * FROM agents WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(Self::row_to_agent).transpose()
    }

    async fn get_all(&self) -> Result<Vec<AgentRecord>> {
        let rows = sqlx::query("SELECT * FROM agents").fetch_all(&self.pool).await.map_err(db_err)?;
        rows.iter().map(Self::row_to_agent).collect()
    }

    async fn agents_on_queue(&self, queue: &str) -> Result<Vec<AgentRecord>> {
        let all = self.get_all().await?;
        Ok(all.into_iter().filter(|a| a.queues.iter().any(|q| q == queue)).collect())
    }

    async fn upsert_patch(&self, name: &str, patch: &Value, now_millis: i64) -> Result<()> {
        let mut agent = self.load_or_new(name, now_millis).await?;

        if let Value::Object(fields) = patch {
            if let Some(state) = fields.get("state").and_then(|v| v.as_str()) {
                agent.state = AgentState::parse(state);
            }
            if let Some(queues) = fields.get("queues").and_then(|v| v.as_array()) {
                agent.queues = queues.iter().filter_map(|v| v.as_str().map(String::from)).collect();
            }
            if let Some(location) = fields.get("location").and_then(|v| v.as_str()) {
                agent.location = Some(location.to_string());
            }
            if fields.contains_key("job_id") {
                agent.job_id = fields.get("job_id").and_then(|v| v.as_str()).map(String::from);
            }
        }
        agent.last_updated = now_millis;

        self.save(&agent).await
    }

    async fn append_log_line(&self, name: &str, line: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        let mut agent = self.load_or_new(name, now).await?;
        agent.push_log_line(line.to_string());
        agent.last_updated = now;
        self.save(&agent).await
    }

    async fn record_provision(&self, name: &str, entry: ProvisionLogEntry) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        let mut agent = self.load_or_new(name, now).await?;
        agent.record_provision(entry);
        agent.last_updated = now;
        self.save(&agent).await
    }
}
