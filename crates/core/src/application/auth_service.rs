// AuthZ application service (§4.3), grounded directly in
// original_source/server/src/testflinger/api/auth.py.

use crate::domain::{ClientPermissions, RefreshToken, ServerRole};
use crate::error::{AppError, Result};
use crate::port::{AccessClaims, ClientRepository, PasswordHasher, PermissionsClaim, TokenIssuer};
use std::sync::Arc;

/// Request-scoped identity, built by the HTTP layer's auth middleware from
/// the `Authorization` header and threaded through handlers explicitly —
/// never a thread-local.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    pub client_id: Option<String>,
    pub role: ServerRole,
    pub permissions: Option<PermissionsClaim>,
    pub is_authenticated: bool,
}

impl AuthContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    fn max_priority_for(&self, queue: &str) -> i32 {
        self.permissions
            .as_ref()
            .map(|p| {
                let star = p.max_priority.get(WILDCARD_QUEUE).copied().unwrap_or(0);
                let specific = p.max_priority.get(queue).copied().unwrap_or(0);
                star.max(specific)
            })
            .unwrap_or(0)
    }

    fn max_reservation_for(&self, queue: &str) -> i64 {
        use crate::domain::auth::DEFAULT_MAX_RESERVATION_SECONDS;
        self.permissions
            .as_ref()
            .map(|p| {
                let star = p
                    .max_reservation_time
                    .get(WILDCARD_QUEUE)
                    .copied()
                    .unwrap_or(DEFAULT_MAX_RESERVATION_SECONDS);
                p.max_reservation_time
                    .get(queue)
                    .copied()
                    .unwrap_or(star)
                    .max(star)
            })
            .unwrap_or(DEFAULT_MAX_RESERVATION_SECONDS)
    }

    fn may_use_queue(&self, queue: &str) -> bool {
        self.permissions
            .as_ref()
            .map(|p| p.allowed_queues.iter().any(|q| q == queue))
            .unwrap_or(false)
    }
}

const WILDCARD_QUEUE: &str = "*";

/// priority==0 requires no check; otherwise the caller must be authenticated
/// and cover the requested priority.
pub fn check_max_priority(requested_priority: i32, queue: &str, ctx: &AuthContext) -> Result<()> {
    if requested_priority == 0 {
        return Ok(());
    }
    if !ctx.is_authenticated {
        return Err(AppError::AuthMissing(
            "priority > 0 requires authentication".into(),
        ));
    }
    if ctx.max_priority_for(queue) < requested_priority {
        return Err(AppError::AuthForbidden(format!(
            "client is not permitted priority {requested_priority} on queue {queue}"
        )));
    }
    Ok(())
}

/// Only applies when the queue is actually restricted.
pub fn check_queue_restriction(is_restricted: bool, queue: &str, ctx: &AuthContext) -> Result<()> {
    if !is_restricted {
        return Ok(());
    }
    if !ctx.is_authenticated || !ctx.may_use_queue(queue) {
        return Err(AppError::AuthForbidden(format!(
            "queue {queue} is restricted"
        )));
    }
    Ok(())
}

pub fn check_max_reservation_timeout(requested_seconds: i64, queue: &str, ctx: &AuthContext) -> Result<()> {
    use crate::domain::auth::DEFAULT_MAX_RESERVATION_SECONDS;
    if requested_seconds <= DEFAULT_MAX_RESERVATION_SECONDS {
        return Ok(());
    }
    if !ctx.is_authenticated {
        return Err(AppError::AuthMissing(
            "reservation beyond the default cap requires authentication".into(),
        ));
    }
    if ctx.max_reservation_for(queue) < requested_seconds {
        return Err(AppError::AuthForbidden(format!(
            "client is not permitted a {requested_seconds}s reservation on queue {queue}"
        )));
    }
    Ok(())
}

/// `current_level >= target_level` (original_source `check_role_hierarchy`).
pub fn check_role_hierarchy(current: ServerRole, target: ServerRole) -> bool {
    crate::domain::auth::role_hierarchy_satisfied(current, target)
}

pub fn require_role(ctx: &AuthContext, allowed: &[ServerRole]) -> Result<()> {
    if !ctx.is_authenticated {
        return Err(AppError::AuthMissing("authentication required".into()));
    }
    if !allowed.contains(&ctx.role) {
        return Err(AppError::AuthForbidden("role not permitted".into()));
    }
    Ok(())
}

fn permissions_claim(perms: &ClientPermissions) -> PermissionsClaim {
    PermissionsClaim {
        client_id: perms.client_id.clone(),
        role: perms.role,
        max_priority: perms.max_priority.clone(),
        allowed_queues: perms.allowed_queues.clone(),
        max_reservation_time: perms.max_reservation_time.clone(),
    }
}

/// Composes token issuance, client-secret verification, and refresh-token
/// lifecycle.
pub struct AuthService {
    clients: Arc<dyn ClientRepository>,
    tokens: Arc<dyn TokenIssuer>,
    hasher: Arc<dyn PasswordHasher>,
}

/// Default refresh token lifetime: 30 days, expressed in milliseconds.
pub const REFRESH_TOKEN_LIFETIME_MILLIS: i64 = 30 * 24 * 60 * 60 * 1000;

impl AuthService {
    pub fn new(
        clients: Arc<dyn ClientRepository>,
        tokens: Arc<dyn TokenIssuer>,
        hasher: Arc<dyn PasswordHasher>,
    ) -> Self {
        Self {
            clients,
            tokens,
            hasher,
        }
    }

    pub async fn verify_client_secret(&self, client_id: &str, secret: &str) -> Result<ClientPermissions> {
        let perms = self
            .clients
            .get(client_id)
            .await?
            .ok_or_else(|| AppError::AuthMissing("unknown client".into()))?;
        if !self.hasher.verify(secret, &perms.secret_hash) {
            return Err(AppError::AuthMissing("invalid client secret".into()));
        }
        Ok(perms)
    }

    /// Issue a fresh (access_token, refresh_token) pair for an already
    /// verified client (`POST /oauth2/token`).
    pub async fn issue_tokens(&self, perms: &ClientPermissions, now_millis: i64) -> Result<(String, String)> {
        let access = self.tokens.issue_access_token(permissions_claim(perms), now_millis)?;

        let refresh_token = generate_refresh_token();
        let non_expiring = matches!(perms.role, ServerRole::Admin | ServerRole::Manager);
        let expires_at = if non_expiring {
            None
        } else {
            Some(now_millis + REFRESH_TOKEN_LIFETIME_MILLIS)
        };
        self.clients
            .add_refresh_token(&RefreshToken {
                token: refresh_token.clone(),
                client_id: perms.client_id.clone(),
                issued_at: now_millis,
                expires_at,
                revoked: false,
                last_accessed: now_millis,
            })
            .await?;

        Ok((access, refresh_token))
    }

    /// `POST /oauth2/refresh`: validate the refresh token and mint a new
    /// access token without re-authenticating.
    pub async fn refresh_access_token(&self, refresh_token: &str, now_millis: i64) -> Result<String> {
        let record = self
            .clients
            .get_refresh_token(refresh_token)
            .await?
            .ok_or_else(|| AppError::Conflict("unknown refresh token".into()))?;
        if !record.is_valid(now_millis) {
            return Err(AppError::Conflict("refresh token expired or revoked".into()));
        }
        let perms = self
            .clients
            .get(&record.client_id)
            .await?
            .ok_or_else(|| AppError::NotFound("client no longer exists".into()))?;
        self.clients.touch_refresh_token(refresh_token, now_millis).await?;
        self.tokens.issue_access_token(permissions_claim(&perms), now_millis)
    }

    pub async fn revoke_refresh_token(&self, refresh_token: &str) -> Result<bool> {
        self.clients.revoke_refresh_token(refresh_token).await
    }

    pub fn decode_bearer(&self, bearer: &str, now_millis: i64) -> AuthContext {
        let token = bearer.strip_prefix("Bearer ").unwrap_or(bearer);
        match self.tokens.decode_access_token(token, now_millis) {
            Ok(AccessClaims { permissions, .. }) => AuthContext {
                client_id: Some(permissions.client_id.clone()),
                role: permissions.role,
                permissions: Some(permissions),
                is_authenticated: true,
            },
            Err(_) => AuthContext::anonymous(),
        }
    }
}

/// 48-byte URL-safe random token (original_source uses authlib's
/// `generate_token(48)`; hex-encoded bytes from the OS RNG are equivalent
/// entropy and avoid pulling in authlib's grant-flow machinery we don't use).
pub fn generate_refresh_token() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 48];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex_encode(&bytes)
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
