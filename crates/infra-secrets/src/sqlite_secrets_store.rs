// SQLite-backed envelope-encrypted SecretsStore (§4.4): the document-store
// realization alongside the external KV-v2 adapter, grounded in
// original_source/server/src/testflinger/secrets/mongo.py's shape (one row
// per namespace+path) but with AES-256-GCM applied before the value ever
// reaches the `secrets` table, since unlike Mongo this store has no
// network perimeter of its own to rely on.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use async_trait::async_trait;
use rand::RngCore;
use sqlx::{Row, SqlitePool};
use testflinger_core::port::{SecretsError, SecretsStore};

const NONCE_LEN: usize = 12;

pub struct SqliteSecretsStore {
    pool: SqlitePool,
    cipher: Aes256Gcm,
}

impl SqliteSecretsStore {
    /// `key` is the 32-byte data-encryption key; callers source it from
    /// outside the database (env var, mounted secret, KMS-unwrapped blob).
    pub fn new(pool: SqlitePool, key: &[u8; 32]) -> Self {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
        Self { pool, cipher }
    }

    fn encrypt(&self, plaintext: &str) -> Result<(Vec<u8>, Vec<u8>), SecretsError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| SecretsError::StoreError(format!("encryption failed: {e}")))?;
        Ok((ciphertext, nonce_bytes.to_vec()))
    }

    fn decrypt(&self, ciphertext: &[u8], nonce: &[u8]) -> Result<String, SecretsError> {
        let nonce = Nonce::from_slice(nonce);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| SecretsError::UnexpectedError(format!("decryption failed: {e}")))?;
        String::from_utf8(plaintext).map_err(|e| SecretsError::UnexpectedError(e.to_string()))
    }
}

#[async_trait]
impl SecretsStore for SqliteSecretsStore {
    async fn read(&self, namespace: &str, path: &str) -> Result<String, SecretsError> {
        let row = sqlx::query("SELECT ciphertext, nonce FROM secrets WHERE namespace = ?1 AND path = ?2")
            .bind(namespace)
            .bind(path)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| SecretsError::StoreError(e.to_string()))?;

        let row = row.ok_or_else(|| SecretsError::AccessError(format!("unable to access '{path}' under '{namespace}'")))?;
        let ciphertext: Vec<u8> = row.try_get("ciphertext").map_err(|e| SecretsError::StoreError(e.to_string()))?;
        let nonce: Vec<u8> = row.try_get("nonce").map_err(|e| SecretsError::StoreError(e.to_string()))?;

        self.decrypt(&ciphertext, &nonce)
    }

    async fn write(&self, namespace: &str, path: &str, value: &str) -> Result<(), SecretsError> {
        let (ciphertext, nonce) = self.encrypt(value)?;

        sqlx::query(
            "INSERT INTO secrets (namespace, path, ciphertext, nonce) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (namespace, path) DO UPDATE SET ciphertext = excluded.ciphertext, nonce = excluded.nonce",
        )
        .bind(namespace)
        .bind(path)
        .bind(ciphertext)
        .bind(nonce)
        .execute(&self.pool)
        .await
        .map_err(|e| SecretsError::StoreError(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, namespace: &str, path: &str) -> Result<(), SecretsError> {
        sqlx::query("DELETE FROM secrets WHERE namespace = ?1 AND path = ?2")
            .bind(namespace)
            .bind(path)
            .execute(&self.pool)
            .await
            .map_err(|e| SecretsError::StoreError(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteSecretsStore {
        let pool = testflinger_infra_sqlite::create_pool("sqlite::memory:").await.unwrap();
        testflinger_infra_sqlite::run_migrations(&pool).await.unwrap();
        SqliteSecretsStore::new(pool, &[7u8; 32])
    }

    #[tokio::test]
    async fn write_then_read_round_trips_plaintext() {
        let store = store().await;
        store.write("client-a", "wifi_password", "hunter2").await.unwrap();
        assert_eq!(store.read("client-a", "wifi_password").await.unwrap(), "hunter2");
    }

    #[tokio::test]
    async fn reading_missing_path_is_an_access_error() {
        let store = store().await;
        assert!(matches!(store.read("client-a", "missing").await, Err(SecretsError::AccessError(_))));
    }

    #[tokio::test]
    async fn ciphertext_never_stores_plaintext() {
        let store = store().await;
        store.write("client-a", "k", "super-secret-value").await.unwrap();
        let row = sqlx::query("SELECT ciphertext FROM secrets WHERE namespace = 'client-a' AND path = 'k'")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        let ciphertext: Vec<u8> = row.try_get("ciphertext").unwrap();
        assert!(!ciphertext.windows(b"super-secret-value".len()).any(|w| w == b"super-secret-value"));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = store().await;
        store.write("client-a", "k", "v").await.unwrap();
        store.delete("client-a", "k").await.unwrap();
        store.delete("client-a", "k").await.unwrap();
        assert!(store.read("client-a", "k").await.is_err());
    }
}
