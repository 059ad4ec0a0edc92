// JWT access-token issuance (§4.3): HMAC-SHA256, 30s lifetime, carrying the
// full permissions grant so the server can authorize without a DB round trip
// on every request.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use testflinger_core::error::{AppError, Result};
use testflinger_core::port::{AccessClaims, PermissionsClaim, TokenIssuer};

/// Access tokens live for 30 seconds (§4.3) — short enough that a leaked
/// token is nearly useless, long enough to cover one request's lifetime; the
/// refresh token is what clients actually hold onto.
pub const ACCESS_TOKEN_LIFETIME_MILLIS: i64 = 30_000;

pub struct JwtTokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtTokenIssuer {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }
}

impl TokenIssuer for JwtTokenIssuer {
    fn issue_access_token(&self, permissions: PermissionsClaim, now_millis: i64) -> Result<String> {
        let claims = AccessClaims {
            iat: now_millis / 1000,
            exp: (now_millis + ACCESS_TOKEN_LIFETIME_MILLIS) / 1000,
            sub: permissions.client_id.clone(),
            permissions,
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("failed to issue access token: {e}")))
    }

    fn decode_access_token(&self, token: &str, now_millis: i64) -> Result<AccessClaims> {
        // `now_millis` comes from the injected TimeProvider, not the wall
        // clock jsonwebtoken would otherwise use internally, so expiry is
        // checked by hand against it rather than via `validate_exp`.
        let mut validation = Validation::default();
        validation.validate_exp = false;
        let data = decode::<AccessClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| AppError::AuthMissing(format!("invalid access token: {e}")))?;
        if data.claims.exp * 1000 < now_millis {
            return Err(AppError::AuthMissing("access token expired".into()));
        }
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testflinger_core::domain::ServerRole;

    fn perms() -> PermissionsClaim {
        PermissionsClaim {
            client_id: "c1".into(),
            role: ServerRole::User,
            max_priority: Default::default(),
            allowed_queues: vec!["q1".into()],
            max_reservation_time: Default::default(),
        }
    }

    #[test]
    fn issued_token_decodes_back_to_the_same_claims() {
        let issuer = JwtTokenIssuer::new(b"test-secret-key");
        let now = 1_700_000_000_000;
        let token = issuer.issue_access_token(perms(), now).unwrap();
        let decoded = issuer.decode_access_token(&token, now).unwrap();
        assert_eq!(decoded.sub, "c1");
        assert_eq!(decoded.permissions.allowed_queues, vec!["q1"]);
    }

    #[test]
    fn expired_token_is_rejected() {
        let issuer = JwtTokenIssuer::new(b"test-secret-key");
        let now = 1_700_000_000_000;
        let token = issuer.issue_access_token(perms(), now).unwrap();
        let far_future = now + ACCESS_TOKEN_LIFETIME_MILLIS * 1000;
        assert!(issuer.decode_access_token(&token, far_future).is_err());
    }

    #[test]
    fn wrong_key_cannot_decode() {
        let issuer = JwtTokenIssuer::new(b"test-secret-key");
        let other = JwtTokenIssuer::new(b"different-secret-key");
        let now = 1_700_000_000_000;
        let token = issuer.issue_access_token(perms(), now).unwrap();
        assert!(other.decode_access_token(&token, now).is_err());
    }
}
