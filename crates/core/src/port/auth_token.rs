// Token issuance + secret hashing ports (§4.3).
//
// JWT encoding and bcrypt hashing are infrastructure concerns (ADR-001: core
// stays dependency-light); concrete adapters live in testflinger-infra-secrets.

use crate::domain::ServerRole;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Claims embedded in an access token (original_source: `sub`, `exp`, `iat`,
/// plus a `permissions` object carrying role/queue/priority grants).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub exp: i64,
    pub iat: i64,
    pub sub: String,
    pub permissions: PermissionsClaim,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionsClaim {
    pub client_id: String,
    pub role: ServerRole,
    #[serde(default)]
    pub max_priority: HashMap<String, i32>,
    #[serde(default)]
    pub allowed_queues: Vec<String>,
    #[serde(default)]
    pub max_reservation_time: HashMap<String, i64>,
}

pub trait TokenIssuer: Send + Sync {
    /// Mint a 30s-lifetime access token (§4.3).
    fn issue_access_token(&self, permissions: PermissionsClaim, now_millis: i64) -> Result<String>;
    fn decode_access_token(&self, token: &str, now_millis: i64) -> Result<AccessClaims>;
}

#[async_trait]
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, secret: &str) -> Result<String>;
    fn verify(&self, secret: &str, hash: &str) -> bool;
}
