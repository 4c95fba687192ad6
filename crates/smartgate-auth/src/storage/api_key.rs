//! API key storage.

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::credentials::{ApiKey, ApiKeyError};

/// Storage for hashed API keys.
///
/// Methods return [`ApiKeyError`] directly so that lifecycle conditions
/// (not found, revoked) survive the storage boundary.
#[async_trait]
pub trait ApiKeyStorage: Send + Sync {
    /// Inserts a new key.
    ///
    /// # Errors
    ///
    /// Returns `ApiKeyError::Storage` if the id or hash already exists.
    async fn insert(&self, key: ApiKey) -> Result<(), ApiKeyError>;

    /// Finds a key by the hash of its raw material.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, ApiKeyError>;

    /// Finds a key by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_id(&self, id: &str) -> Result<Option<ApiKey>, ApiKeyError>;

    /// Lists all keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn list(&self) -> Result<Vec<ApiKey>, ApiKeyError>;

    /// Marks a key revoked and returns it. Revoking a revoked key is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `ApiKeyError::NotFound` if the key does not exist.
    async fn revoke(&self, id: &str) -> Result<ApiKey, ApiKeyError>;

    /// Revokes `old_id` and inserts `replacement` as one operation.
    ///
    /// # Atomicity
    ///
    /// Either both changes are applied or neither is.
    ///
    /// # Errors
    ///
    /// Returns `ApiKeyError::NotFound` if the old key does not exist and
    /// `ApiKeyError::Revoked` if it is already revoked.
    async fn rotate(&self, old_id: &str, replacement: ApiKey) -> Result<(), ApiKeyError>;

    /// Records the last time a key was used.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn touch(&self, id: &str, at: OffsetDateTime) -> Result<(), ApiKeyError>;
}
