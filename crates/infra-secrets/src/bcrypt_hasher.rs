// bcrypt-backed PasswordHasher (§4.3): hashes client secrets at rest.

use testflinger_core::error::{AppError, Result};
use testflinger_core::port::PasswordHasher;

const BCRYPT_COST: u32 = bcrypt::DEFAULT_COST;

pub struct BcryptHasher;

impl PasswordHasher for BcryptHasher {
    fn hash(&self, secret: &str) -> Result<String> {
        bcrypt::hash(secret, BCRYPT_COST).map_err(|e| AppError::Internal(format!("failed to hash secret: {e}")))
    }

    fn verify(&self, secret: &str, hash: &str) -> bool {
        bcrypt::verify(secret, hash).unwrap_or(false)
    }
}
