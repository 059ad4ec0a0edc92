// SQLite + filesystem infrastructure adapters for the Testflinger dispatch
// engine (§4.1, §4.11): the reference Store realization named in SPEC_FULL §1.

mod agent_repository;
mod client_repository;
mod connection;
mod fs_blob_store;
mod job_repository;
mod log_repository;
mod maintenance_impl;
mod migration;
mod queue_repository;

pub use agent_repository::SqliteAgentRepository;
pub use client_repository::SqliteClientRepository;
pub use connection::create_pool;
pub use fs_blob_store::FsBlobStore;
pub use job_repository::SqliteJobRepository;
pub use log_repository::SqliteLogRepository;
pub use maintenance_impl::SqliteMaintenance;
pub use migration::run_migrations;
pub use queue_repository::SqliteQueueRepository;
