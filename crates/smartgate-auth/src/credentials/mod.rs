//! Credential and response caches: API keys, token revocation, idempotency.

pub mod api_key;
pub mod idempotency;
pub mod revocation;

pub use api_key::{
    ApiKey, ApiKeyError, ApiKeyManager, ApiKeyStatus, DISPLAY_PREFIX_LEN, GeneratedApiKey,
    NewApiKey, hash_api_key,
};
pub use idempotency::{IdempotencyLookup, IdempotencyRecord, IdempotencyStore};
pub use revocation::{RevocationEntry, RevocationStore};
