// Port Layer - Interfaces for external dependencies

pub mod agent_repository;
pub mod auth_token;
pub mod blob_store;
pub mod client_repository;
pub mod id_provider;
pub mod job_repository;
pub mod log_repository;
pub mod maintenance;
pub mod queue_repository;
pub mod secrets_store;
pub mod time_provider;
pub mod webhook;

pub use agent_repository::AgentRepository;
pub use auth_token::{AccessClaims, PasswordHasher, PermissionsClaim, TokenIssuer};
pub use blob_store::{BlobStore, ByteChunk};
pub use client_repository::ClientRepository;
pub use id_provider::IdProvider;
pub use job_repository::{JobRepository, SearchFilter, TagMatch, WaitSample};
pub use log_repository::LogRepository;
pub use maintenance::{Maintenance, MaintenanceConfig, MaintenanceStats};
pub use queue_repository::QueueRepository;
pub use secrets_store::{SecretsError, SecretsStore};
pub use time_provider::TimeProvider;
pub use webhook::WebhookNotifier;
