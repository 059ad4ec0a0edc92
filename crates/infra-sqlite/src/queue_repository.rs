// SQLite-backed QueueRepository (§3, §4.1 restricted queue check).

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use testflinger_core::domain::Queue;
use testflinger_core::error::{AppError, Result};
use testflinger_core::port::QueueRepository;

pub struct SqliteQueueRepository {
    pool: SqlitePool,
}

impl SqliteQueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn db_err(e: sqlx::Error) -> AppError {
    AppError::StoreUnavailable(e.to_string())
}

#[async_trait]
impl QueueRepository for SqliteQueueRepository {
    async fn get_all(&self) -> Result<Vec<Queue>> {
        let rows = sqlx::query("SELECT * FROM queues").fetch_all(&self.pool).await.map_err(db_err)?;
        rows.iter()
            .map(|r| {
                let images_json: String = r.try_get("images_json").map_err(db_err)?;
                Ok(Queue {
                    name: r.try_get("name").map_err(db_err)?,
                    description: r.try_get("description").map_err(db_err)?,
                    images: serde_json::from_str(&images_json)?,
                })
            })
            .collect()
    }

    async fn upsert_description(&self, name: &str, description: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO queues (name, description) VALUES (?1, ?2)
             ON CONFLICT (name) DO UPDATE SET description = excluded.description",
        )
        .bind(name)
        .bind(description)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_images(&self, queue: &str) -> Result<HashMap<String, Value>> {
        let row = sqlx::query("SELECT images_json FROM queues WHERE name = ?1")
            .bind(queue)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        match row {
            Some(r) => {
                let images_json: String = r.try_get("images_json").map_err(db_err)?;
                Ok(serde_json::from_str(&images_json)?)
            }
            None => Ok(HashMap::new()),
        }
    }

    async fn set_images(&self, images: &HashMap<String, Value>) -> Result<()> {
        // Images are advertised per-queue but the port takes the full map
        // keyed by queue name (mirrors original_source's single
        // `agents_images_post` payload covering every queue an agent
        // services at once).
        for (queue, image_value) in images {
            let existing = self.get_images(queue).await?;
            let mut merged = existing;
            if let Value::Object(obj) = image_value {
                for (k, v) in obj {
                    merged.insert(k.clone(), v.clone());
                }
            }
            let images_json = serde_json::to_string(&merged)?;
            sqlx::query(
                "INSERT INTO queues (name, images_json) VALUES (?1, ?2)
                 ON CONFLICT (name) DO UPDATE SET images_json = excluded.images_json",
            )
            .bind(queue)
            .bind(images_json)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        }
        Ok(())
    }

    async fn is_restricted(&self, name: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM restricted_queue_owners WHERE queue_name = ?1")
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(count > 0)
    }

    async fn restricted_owners(&self, name: &str) -> Result<Vec<String>> {
        let owners: Vec<String> = sqlx::query_scalar("SELECT client_id FROM restricted_queue_owners WHERE queue_name = ?1")
            .bind(name)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(owners)
    }

    async fn all_restricted(&self) -> Result<HashMap<String, Vec<String>>> {
        let rows = sqlx::query("SELECT queue_name, client_id FROM restricted_queue_owners")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        let mut out: HashMap<String, Vec<String>> = HashMap::new();
        for row in rows {
            let queue: String = row.try_get("queue_name").map_err(db_err)?;
            let client: String = row.try_get("client_id").map_err(db_err)?;
            out.entry(queue).or_default().push(client);
        }
        Ok(out)
    }

    async fn add_restricted_owner(&self, name: &str, client_id: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO restricted_queue_owners (queue_name, client_id) VALUES (?1, ?2)")
            .bind(name)
            .bind(client_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn remove_restricted_queue(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM restricted_queue_owners WHERE queue_name = ?1")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};

    async fn repo() -> SqliteQueueRepository {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteQueueRepository::new(pool)
    }

    #[tokio::test]
    async fn restricted_owner_roundtrip() {
        let repo = repo().await;
        assert!(!repo.is_restricted("q1").await.unwrap());
        repo.add_restricted_owner("q1", "client-a").await.unwrap();
        assert!(repo.is_restricted("q1").await.unwrap());
        assert_eq!(repo.restricted_owners("q1").await.unwrap(), vec!["client-a"]);
        assert!(repo.remove_restricted_queue("q1").await.unwrap());
        assert!(!repo.is_restricted("q1").await.unwrap());
    }

    #[tokio::test]
    async fn description_upsert_overwrites() {
        let repo = repo().await;
        repo.upsert_description("q1", "first").await.unwrap();
        repo.upsert_description("q1", "second").await.unwrap();
        let all = repo.get_all().await.unwrap();
        assert_eq!(all[0].description.as_deref(), Some("second"));
    }
}
