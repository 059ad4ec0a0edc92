// Server configuration (§6 config keys), loaded the same way the agent
// loads its own: a `config` crate builder layering a file over environment
// variables, with `TESTFLINGER_SERVER__*`-style double-underscore env
// fallback for nested keys.

use serde::Deserialize;
use testflinger_core::error::{AppError, Result};

fn default_bind_address() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_db_path() -> String {
    "~/.testflinger/server.db".to_string()
}

fn default_blob_root() -> String {
    "~/.testflinger/blobs".to_string()
}

fn default_max_result_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_long_poll_seconds() -> u64 {
    30
}

fn default_maintenance_period_hours() -> u64 {
    24
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_blob_root")]
    pub blob_root: String,
    #[serde(default = "default_max_result_bytes")]
    pub max_result_bytes: usize,
    #[serde(default = "default_long_poll_seconds")]
    pub long_poll_seconds: u64,
    #[serde(default = "default_maintenance_period_hours")]
    pub maintenance_period_hours: u64,

    /// HMAC secret used to sign/verify access tokens (§4.3). Required in
    /// production; a fixed dev value is used only outside `--release`-style
    /// deployments so local runs don't need a `.env` file to boot.
    pub jwt_signing_key: Option<String>,

    /// When set, secrets are proxied to an external KV-v2 service at this
    /// base URL (`testflinger-infra-secrets::HttpSecretsStore`). When unset,
    /// falls back to the envelope-encrypted sqlite store, keyed by
    /// `secrets_encryption_key`.
    pub secrets_vault_url: Option<String>,
    pub secrets_vault_token: Option<String>,
    pub secrets_encryption_key: Option<String>,
}

impl ServerSettings {
    pub fn load(path: Option<&std::path::Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("bind_address", default_bind_address())
            .map_err(config_err)?
            .set_default("db_path", default_db_path())
            .map_err(config_err)?
            .set_default("blob_root", default_blob_root())
            .map_err(config_err)?
            .set_default("max_result_bytes", default_max_result_bytes() as i64)
            .map_err(config_err)?
            .set_default("long_poll_seconds", default_long_poll_seconds() as i64)
            .map_err(config_err)?
            .set_default("maintenance_period_hours", default_maintenance_period_hours() as i64)
            .map_err(config_err)?;

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let settings = builder
            .add_source(config::Environment::with_prefix("TESTFLINGER_SERVER").separator("__"))
            .build()
            .map_err(config_err)?;

        settings.try_deserialize().map_err(config_err)
    }

    pub fn resolved_db_path(&self) -> String {
        shellexpand::tilde(&self.db_path).into_owned()
    }

    pub fn resolved_blob_root(&self) -> std::path::PathBuf {
        std::path::PathBuf::from(shellexpand::tilde(&self.blob_root).into_owned())
    }
}

fn config_err(e: impl std::fmt::Display) -> AppError {
    AppError::Config(e.to_string())
}
