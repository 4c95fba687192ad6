//! Authorization code storage.

use async_trait::async_trait;

use crate::AuthResult;
use crate::oauth::session::AuthorizationCode;

/// Storage for pending authorization codes.
#[async_trait]
pub trait AuthorizationCodeStorage: Send + Sync {
    /// Stores a freshly issued code.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn store(&self, code: AuthorizationCode) -> AuthResult<()>;

    /// Removes and returns a code.
    ///
    /// # Atomicity
    ///
    /// Lookup and removal are one operation: of any number of concurrent
    /// calls with the same code, at most one receives `Some`. Expired codes
    /// are still returned so the caller can report `invalid_grant` with a
    /// precise reason.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn consume(&self, code: &str) -> AuthResult<Option<AuthorizationCode>>;

    /// Removes expired codes.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn cleanup_expired(&self) -> AuthResult<u64>;
}
