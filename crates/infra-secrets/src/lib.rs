// Auth and secrets infrastructure adapters for the Testflinger dispatch
// engine (§4.3, §4.4).

mod bcrypt_hasher;
mod http_secrets_store;
mod jwt_token_issuer;
mod sqlite_secrets_store;

pub use bcrypt_hasher::BcryptHasher;
pub use http_secrets_store::HttpSecretsStore;
pub use jwt_token_issuer::{JwtTokenIssuer, ACCESS_TOKEN_LIFETIME_MILLIS};
pub use sqlite_secrets_store::SqliteSecretsStore;
