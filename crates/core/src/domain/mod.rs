// Domain Layer - Pure business logic and entities

pub mod agent;
pub mod auth;
pub mod error;
pub mod job;
pub mod log_fragment;
pub mod queue;

// Re-exports
pub use agent::{AgentRecord, AgentState, ProvisionLogEntry, StreakType};
pub use auth::{ClientPermissions, RefreshToken, ServerRole, TESTFLINGER_ADMIN_ID};
pub use error::DomainError;
pub use job::{AttachmentsStatus, Job, JobId, JobSpec, JobState, PHASE_SEQUENCE};
pub use log_fragment::{AssembledPhaseLog, LogFragment, LogType};
pub use queue::{Queue, QueueId};
