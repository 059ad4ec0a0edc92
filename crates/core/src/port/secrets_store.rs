// SecretsStore Port (§4.4)
//
// Abstract capability; two concrete adapters exist (an external KV-v2-style
// HTTP secret manager, and a document-store-backed envelope-encrypted
// variant), both in `testflinger-infra-secrets`. The dispatch core only
// depends on this trait.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecretsError {
    /// Denied or not found — surfaced to the user as 400/422.
    #[error("access denied or not found: {0}")]
    AccessError(String),

    /// Transport/decrypt failure — 500.
    #[error("secrets store error: {0}")]
    StoreError(String),

    /// Malformed data — 500.
    #[error("unexpected secrets store response: {0}")]
    UnexpectedError(String),
}

#[async_trait]
pub trait SecretsStore: Send + Sync {
    /// Namespace is typically the owning client_id.
    async fn read(&self, namespace: &str, path: &str) -> Result<String, SecretsError>;
    async fn write(&self, namespace: &str, path: &str, value: &str) -> Result<(), SecretsError>;
    async fn delete(&self, namespace: &str, path: &str) -> Result<(), SecretsError>;
}
