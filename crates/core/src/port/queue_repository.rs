// Queue Repository Port (§4.1 "restricted queue check", §3 Queue)

use crate::domain::Queue;
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;

#[async_trait]
pub trait QueueRepository: Send + Sync {
    async fn get_all(&self) -> Result<Vec<Queue>>;
    async fn upsert_description(&self, name: &str, description: &str) -> Result<()>;
    async fn get_images(&self, queue: &str) -> Result<std::collections::HashMap<String, Value>>;
    async fn set_images(&self, images: &std::collections::HashMap<String, Value>) -> Result<()>;

    /// Queues with at least one registered owner.
    async fn is_restricted(&self, name: &str) -> Result<bool>;
    async fn restricted_owners(&self, name: &str) -> Result<Vec<String>>;
    async fn all_restricted(&self) -> Result<std::collections::HashMap<String, Vec<String>>>;
    async fn add_restricted_owner(&self, name: &str, client_id: &str) -> Result<()>;
    async fn remove_restricted_queue(&self, name: &str) -> Result<bool>;
}
