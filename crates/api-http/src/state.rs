// Shared application state (ADR-001 composition root wires this once and
// hands every handler an `Arc`-cheap clone). No handler reaches a global;
// everything flows through `State<AppState>`.

use std::sync::Arc;

use testflinger_core::application::{AuthService, DispatchService, ResultsService, WebhookProxy};
use testflinger_core::port::{
    AgentRepository, BlobStore, ClientRepository, JobRepository, LogRepository, PasswordHasher, QueueRepository, SecretsStore,
    TimeProvider,
};

#[derive(Clone)]
pub struct AppState {
    pub dispatch: Arc<DispatchService>,
    pub results: Arc<ResultsService>,
    pub auth: Arc<AuthService>,
    pub webhook: Arc<WebhookProxy>,

    pub jobs: Arc<dyn JobRepository>,
    pub queues: Arc<dyn QueueRepository>,
    pub agents: Arc<dyn AgentRepository>,
    pub clients: Arc<dyn ClientRepository>,
    pub secrets: Option<Arc<dyn SecretsStore>>,
    pub blobs: Arc<dyn BlobStore>,
    pub logs: Arc<dyn LogRepository>,
    pub clock: Arc<dyn TimeProvider>,
    /// Used directly by the client-permissions routes to hash an
    /// administrator-supplied plaintext secret before persisting it.
    pub hasher: Arc<dyn PasswordHasher>,

    /// Bodies above this are rejected with 413 before the store is touched
    /// (§4.2 "Payload size", roughly the document store's ~16 MiB limit).
    pub max_result_bytes: usize,
    /// How long a `GET /v1/job?queue=` poll is allowed to block before
    /// returning 204 (§5 Timeouts: "job poll 30s").
    pub long_poll_timeout: std::time::Duration,
}
