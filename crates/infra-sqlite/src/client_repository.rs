// SQLite-backed ClientRepository (§4.3): permissions + refresh tokens.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use testflinger_core::domain::{ClientPermissions, RefreshToken, ServerRole};
use testflinger_core::error::{AppError, Result};
use testflinger_core::port::ClientRepository;

pub struct SqliteClientRepository {
    pool: SqlitePool,
}

impl SqliteClientRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_perms(row: &sqlx::sqlite::SqliteRow) -> Result<ClientPermissions> {
        let role_str: String = row.try_get("role").map_err(db_err)?;
        let max_priority_json: String = row.try_get("max_priority_json").map_err(db_err)?;
        let allowed_queues_json: String = row.try_get("allowed_queues_json").map_err(db_err)?;
        let max_reservation_json: String = row.try_get("max_reservation_json").map_err(db_err)?;

        Ok(ClientPermissions {
            client_id: row.try_get("client_id").map_err(db_err)?,
            secret_hash: row.try_get("secret_hash").map_err(db_err)?,
            role: ServerRole::parse(&role_str)
                .ok_or_else(|| AppError::Internal(format!("corrupt role: {role_str}")))?,
            max_priority: serde_json::from_str(&max_priority_json)?,
            allowed_queues: serde_json::from_str(&allowed_queues_json)?,
            max_reservation_time: serde_json::from_str(&max_reservation_json)?,
        })
    }

    fn row_to_refresh_token(row: &sqlx::sqlite::SqliteRow) -> Result<RefreshToken> {
        Ok(RefreshToken {
            token: row.try_get("token").map_err(db_err)?,
            client_id: row.try_get("client_id").map_err(db_err)?,
            issued_at: row.try_get("issued_at").map_err(db_err)?,
            expires_at: row.try_get("expires_at").map_err(db_err)?,
            revoked: row.try_get::<i64, _>("revoked").map_err(db_err)? != 0,
            last_accessed: row.try_get("last_accessed").map_err(db_err)?,
        })
    }
}

fn db_err(e: sqlx::Error) -> AppError {
    AppError::StoreUnavailable(e.to_string())
}

#[async_trait]
impl ClientRepository for SqliteClientRepository {
    async fn get(&self, client_id: &str) -> Result<Option<ClientPermissions>> {
        let row = sqlx::query("SELECT * FROM client_permissions WHERE client_id = ?1")
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(Self::row_to_perms).transpose()
    }

    async fn get_all(&self) -> Result<Vec<ClientPermissions>> {
        let rows = sqlx::query("SELECT * FROM client_permissions")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(Self::row_to_perms).collect()
    }

    async fn upsert(&self, perms: &ClientPermissions) -> Result<()> {
        let max_priority_json = serde_json::to_string(&perms.max_priority)?;
        let allowed_queues_json = serde_json::to_string(&perms.allowed_queues)?;
        let max_reservation_json = serde_json::to_string(&perms.max_reservation_time)?;

        sqlx::query(
            "INSERT INTO client_permissions (client_id, secret_hash, role, max_priority_json, allowed_queues_json, max_reservation_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (client_id) DO UPDATE SET
                secret_hash = excluded.secret_hash,
                role = excluded.role,
                max_priority_json = excluded.max_priority_json,
                allowed_queues_json = excluded.allowed_queues_json,
                max_reservation_json = excluded.max_reservation_json",
        )
        .bind(&perms.client_id)
        .bind(&perms.secret_hash)
        .bind(perms.role.as_str())
        .bind(max_priority_json)
        .bind(allowed_queues_json)
        .bind(max_reservation_json)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn delete(&self, client_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM client_permissions WHERE client_id = ?1")
            .bind(client_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_refresh_token(&self, token: &RefreshToken) -> Result<()> {
        sqlx::query(
            "INSERT INTO refresh_tokens (token, client_id, issued_at, expires_at, revoked, last_accessed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&token.token)
        .bind(&token.client_id)
        .bind(token.issued_at)
        .bind(token.expires_at)
        .bind(token.revoked as i64)
        .bind(token.last_accessed)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>> {
        let row = sqlx::query("SELECT * FROM refresh_tokens WHERE token = ?1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(Self::row_to_refresh_token).transpose()
    }

    async fn touch_refresh_token(&self, token: &str, now_millis: i64) -> Result<()> {
        sqlx::query("UPDATE refresh_tokens SET last_accessed = ?1 WHERE token = ?2")
            .bind(now_millis)
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn revoke_refresh_token(&self, token: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE refresh_tokens SET revoked = 1 WHERE token = ?1 AND revoked = 0")
            .bind(token)
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
    use std::collections::HashMap;

    async fn repo() -> SqliteClientRepository {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteClientRepository::new(pool)
    }

    fn perms(id: &str) -> ClientPermissions {
        ClientPermissions {
            client_id: id.into(),
            secret_hash: "hash".into(),
            role: ServerRole::User,
            max_priority: HashMap::new(),
            allowed_queues: vec!["q1".into()],
            max_reservation_time: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let repo = repo().await;
        repo.upsert(&perms("c1")).await.unwrap();
        let fetched = repo.get("c1").await.unwrap().unwrap();
        assert_eq!(fetched.allowed_queues, vec!["q1"]);
    }

    #[tokio::test]
    async fn refresh_token_lifecycle() {
        let repo = repo().await;
        repo.upsert(&perms("c1")).await.unwrap();
        let token = RefreshToken {
            token: "tok123".into(),
            client_id: "c1".into(),
            issued_at: 1000,
            expires_at: Some(2000),
            revoked: false,
            last_accessed: 1000,
        };
        repo.add_refresh_token(&token).await.unwrap();
        assert!(repo.get_refresh_token("tok123").await.unwrap().unwrap().is_valid(1500));

        repo.touch_refresh_token("tok123", 1500).await.unwrap();
        assert_eq!(repo.get_refresh_token("tok123").await.unwrap().unwrap().last_accessed, 1500);

        assert!(repo.revoke_refresh_token("tok123").await.unwrap());
        assert!(!repo.get_refresh_token("tok123").await.unwrap().unwrap().is_valid(1500));
        assert!(!repo.revoke_refresh_token("tok123").await.unwrap());
    }

    #[tokio::test]
    async fn delete_removes_client() {
        let repo = repo().await;
        repo.upsert(&perms("c1")).await.unwrap();
        assert!(repo.delete("c1").await.unwrap());
        assert!(repo.get("c1").await.unwrap().is_none());
    }
}
