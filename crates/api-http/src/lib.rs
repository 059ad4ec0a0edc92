//! REST API layer (§4.2, §6).
//!
//! Thin axum handlers: authenticate, authorize via `testflinger-core`'s
//! application services, delegate to the repository ports, and shape the
//! response. No business rule lives in this crate.

pub mod auth;
pub mod blob;
pub mod error;
pub mod router;
pub mod routes;
pub mod state;

pub use router::build_router;
pub use state::AppState;
