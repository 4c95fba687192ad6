//! Idempotent response cache storage.

use async_trait::async_trait;

use crate::AuthResult;
use crate::credentials::{IdempotencyLookup, IdempotencyRecord};

/// Cached responses keyed by caller-namespaced `Idempotency-Key`.
///
/// Implementations return and store copies; a caller mutating a fetched
/// record must not affect the cache.
#[async_trait]
pub trait IdempotencyStorage: Send + Sync {
    /// Returns an unexpired record.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn get(&self, key: &str) -> AuthResult<Option<IdempotencyRecord>>;

    /// Stores a record, replacing any previous one for the key.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn set(&self, record: IdempotencyRecord) -> AuthResult<()>;

    /// Removes a record. Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn delete(&self, key: &str) -> AuthResult<bool>;

    /// Removes records older than the TTL.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn cleanup_expired(&self) -> AuthResult<u64>;

    /// Classifies an incoming request against the cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn lookup(&self, key: &str, method: &str, path: &str) -> AuthResult<IdempotencyLookup> {
        Ok(match self.get(key).await? {
            None => IdempotencyLookup::Miss,
            Some(record) if record.method == method && record.path == path => {
                IdempotencyLookup::Replay(record)
            }
            Some(record) => IdempotencyLookup::Mismatch {
                method: record.method,
                path: record.path,
            },
        })
    }
}
