//! Access token denylist storage.

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::AuthResult;
use crate::credentials::RevocationEntry;

/// Denylist of access token ids plus the per-user index behind
/// "revoke everything for this user".
#[async_trait]
pub trait RevocationStorage: Send + Sync {
    /// Denylists a token until `expires_at`, optionally attributed to a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn revoke(
        &self,
        token_id: &str,
        user_id: Option<&str>,
        expires_at: OffsetDateTime,
    ) -> AuthResult<RevocationEntry>;

    /// Denylists a token and attributes it to a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn revoke_for_user(
        &self,
        token_id: &str,
        user_id: &str,
        expires_at: OffsetDateTime,
    ) -> AuthResult<RevocationEntry> {
        self.revoke(token_id, Some(user_id), expires_at).await
    }

    /// Records that a user presented a token.
    ///
    /// Called on every authenticated request, so an already recorded token
    /// must not contend with writers.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn record_token(
        &self,
        user_id: &str,
        token_id: &str,
        expires_at: OffsetDateTime,
    ) -> AuthResult<()>;

    /// Denylists every unexpired token recorded for a user. Tokens never
    /// recorded are not covered.
    ///
    /// # Returns
    ///
    /// The number of newly denylisted tokens.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn revoke_all_for_user(&self, user_id: &str) -> AuthResult<usize>;

    /// Denylist membership.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn is_revoked(&self, token_id: &str) -> AuthResult<bool>;

    /// Unexpired entries, most recent first.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn list_active(&self) -> AuthResult<Vec<RevocationEntry>>;

    /// Removes expired entries and prunes the per-user index.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn cleanup_expired(&self) -> AuthResult<u64>;
}
