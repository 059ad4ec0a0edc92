// Central Error Type for the Application
//
// Mirrors the server's §7 taxonomy (InputInvalid/AuthMissing/AuthForbidden/
// NotFound/Conflict/PayloadTooLarge/UpstreamTimeout/StoreUnavailable/Unhandled).
// HTTP handlers map each variant to a status code in a single place instead of
// scattering status logic across handlers.

use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    /// 422 - request failed schema/semantic validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// 401 - missing or expired credentials
    #[error("Authentication required: {0}")]
    AuthMissing(String),

    /// 403 - authenticated but not permitted
    #[error("Forbidden: {0}")]
    AuthForbidden(String),

    /// 404
    #[error("Not found: {0}")]
    NotFound(String),

    /// 400 - domain conflict (already terminal, already revoked, ...)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// 413
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// 504 - status webhook did not respond in time
    #[error("Upstream timeout: {0}")]
    UpstreamTimeout(String),

    /// 500 - document/blob store connectivity
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// 500 - catch-all
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

// From implementations for infra crates (to avoid circular dependency)
impl From<String> for AppError {
    fn from(err: String) -> Self {
        AppError::StoreUnavailable(err)
    }
}

// Note: sqlx::Error conversion is handled in infra-sqlite crate
// by converting to AppError::StoreUnavailable(String).
