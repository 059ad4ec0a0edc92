pub mod agents;
pub mod client_permissions;
pub mod job;
pub mod oauth;
pub mod queues;
pub mod restricted_queues;
pub mod result;
pub mod secrets;
