// Agent-local error type (§7: propagation policy on the agent side). Kept
// separate from `testflinger_core::AppError` since the agent's failure
// modes are network/process, not the server's domain taxonomy.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("server rejected request: {0}")]
    ServerRejected(String),

    #[error("no job available")]
    NoJob,
}

pub type Result<T> = std::result::Result<T, AgentError>;
