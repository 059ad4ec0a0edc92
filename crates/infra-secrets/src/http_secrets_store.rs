// External KV-v2-style secrets manager adapter (§4.4), grounded in
// original_source/server/src/testflinger/secrets/vault.py: secrets live at
// `{base_url}/v1/secret/data/{namespace}/{path}` (read/write) and
// `{base_url}/v1/secret/metadata/{namespace}/{path}` (delete), authenticated
// with a bearer token.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use testflinger_core::port::{SecretsError, SecretsStore};

pub struct HttpSecretsStore {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpSecretsStore {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    fn data_url(&self, namespace: &str, path: &str) -> String {
        format!("{}/v1/secret/data/{}/{}", self.base_url.trim_end_matches('/'), namespace, path)
    }

    fn metadata_url(&self, namespace: &str, path: &str) -> String {
        format!("{}/v1/secret/metadata/{}/{}", self.base_url.trim_end_matches('/'), namespace, path)
    }
}

#[derive(Deserialize)]
struct KvReadResponse {
    data: KvReadData,
}

#[derive(Deserialize)]
struct KvReadData {
    data: KvReadValue,
}

#[derive(Deserialize)]
struct KvReadValue {
    value: String,
}

#[async_trait]
impl SecretsStore for HttpSecretsStore {
    async fn read(&self, namespace: &str, path: &str) -> Result<String, SecretsError> {
        let response = self
            .client
            .get(self.data_url(namespace, path))
            .header("X-Vault-Token", &self.token)
            .send()
            .await
            .map_err(|e| SecretsError::StoreError(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND
            || response.status() == reqwest::StatusCode::FORBIDDEN
            || response.status() == reqwest::StatusCode::UNAUTHORIZED
        {
            return Err(SecretsError::AccessError(format!("unable to access '{path}' under '{namespace}'")));
        }
        if !response.status().is_success() {
            return Err(SecretsError::StoreError(format!("secrets store returned {}", response.status())));
        }

        let parsed: KvReadResponse = response
            .json()
            .await
            .map_err(|e| SecretsError::UnexpectedError(e.to_string()))?;
        Ok(parsed.data.data.value)
    }

    async fn write(&self, namespace: &str, path: &str, value: &str) -> Result<(), SecretsError> {
        let response = self
            .client
            .post(self.data_url(namespace, path))
            .header("X-Vault-Token", &self.token)
            .json(&json!({ "data": { "value": value } }))
            .send()
            .await
            .map_err(|e| SecretsError::StoreError(e.to_string()))?;

        if response.status() == reqwest::StatusCode::FORBIDDEN || response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(SecretsError::AccessError(format!("unable to modify '{path}' for '{namespace}'")));
        }
        if !response.status().is_success() {
            return Err(SecretsError::StoreError(format!("secrets store returned {}", response.status())));
        }
        Ok(())
    }

    async fn delete(&self, namespace: &str, path: &str) -> Result<(), SecretsError> {
        let response = self
            .client
            .delete(self.metadata_url(namespace, path))
            .header("X-Vault-Token", &self.token)
            .send()
            .await
            .map_err(|e| SecretsError::StoreError(e.to_string()))?;

        // Deleting an already-absent path is not a failure (vault.py: only
        // Forbidden/Unauthorized propagate; InvalidPath is swallowed).
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        if response.status() == reqwest::StatusCode::FORBIDDEN || response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(SecretsError::AccessError(format!("unable to modify '{path}' for '{namespace}'")));
        }
        if !response.status().is_success() {
            return Err(SecretsError::StoreError(format!("secrets store returned {}", response.status())));
        }
        Ok(())
    }
}
