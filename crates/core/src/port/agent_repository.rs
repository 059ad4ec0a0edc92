// Agent Repository Port (§3 Agent record, §4.2 agents/* endpoints)

use crate::domain::{AgentRecord, ProvisionLogEntry};
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;

#[async_trait]
pub trait AgentRepository: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<AgentRecord>>;
    async fn get_all(&self) -> Result<Vec<AgentRecord>>;
    async fn agents_on_queue(&self, queue: &str) -> Result<Vec<AgentRecord>>;

    /// Apply an arbitrary JSON patch to an agent record, creating it if it
    /// does not exist yet (original_source `agents_post`: first contact
    /// registers the agent).
    async fn upsert_patch(&self, name: &str, patch: &Value, now_millis: i64) -> Result<()>;

    async fn append_log_line(&self, name: &str, line: &str) -> Result<()>;
    async fn record_provision(&self, name: &str, entry: ProvisionLogEntry) -> Result<()>;
}
