// Client permissions + refresh token repository port (§4.3)

use crate::domain::{ClientPermissions, RefreshToken};
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait ClientRepository: Send + Sync {
    async fn get(&self, client_id: &str) -> Result<Option<ClientPermissions>>;
    async fn get_all(&self) -> Result<Vec<ClientPermissions>>;
    async fn upsert(&self, perms: &ClientPermissions) -> Result<()>;
    async fn delete(&self, client_id: &str) -> Result<bool>;

    async fn add_refresh_token(&self, token: &RefreshToken) -> Result<()>;
    async fn get_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>>;
    async fn touch_refresh_token(&self, token: &str, now_millis: i64) -> Result<()>;
    async fn revoke_refresh_token(&self, token: &str) -> Result<bool>;
}
