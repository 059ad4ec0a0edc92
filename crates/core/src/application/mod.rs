// Application Layer - Use cases composed over the port layer.
//
// Nothing here talks to a database, the filesystem, or the network
// directly; everything goes through a `port::*` trait, keeping this crate
// free of infrastructure dependencies (ADR-001).

pub mod auth_service;
pub mod dispatch;
pub mod maintenance_scheduler;
pub mod percentiles;
pub mod results;
pub mod secrets_resolution;
pub mod shutdown;
pub mod webhook;

pub use auth_service::{AuthContext, AuthService};
pub use dispatch::DispatchService;
pub use maintenance_scheduler::MaintenanceScheduler;
pub use percentiles::{percentile, queue_wait_times, QueueWaitStats};
pub use results::ResultsService;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
pub use webhook::WebhookProxy;
