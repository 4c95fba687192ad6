//! Refresh token storage.

use async_trait::async_trait;

use crate::AuthResult;
use crate::types::RefreshToken;

/// Storage for refresh tokens, keyed by token hash.
#[async_trait]
pub trait RefreshTokenStorage: Send + Sync {
    /// Stores a refresh token record.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn store(&self, token: RefreshToken) -> AuthResult<()>;

    /// Finds a record by the hash of the presented token.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_hash(&self, token_hash: &str) -> AuthResult<Option<RefreshToken>>;

    /// Deletes a record. Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn delete(&self, token_hash: &str) -> AuthResult<bool>;

    /// Removes expired records.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn cleanup_expired(&self) -> AuthResult<u64>;
}
