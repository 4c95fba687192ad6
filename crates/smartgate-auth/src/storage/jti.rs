//! Replay cache for client assertion `jti` values.

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::AuthResult;

/// Tracks assertion ids that have already been presented.
///
/// Entries live until the assertion's own expiry; after that the assertion
/// would be rejected on `exp` anyway, so the entry carries no information.
#[async_trait]
pub trait JtiStorage: Send + Sync {
    /// Atomically records a `jti` unless it is already recorded.
    ///
    /// # Returns
    ///
    /// `true` on first use, `false` on replay.
    ///
    /// # Atomicity
    ///
    /// Check and insert must happen under one lock (or one statement) so
    /// that two concurrent presentations of the same assertion cannot both
    /// observe "unused".
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn mark_used(&self, jti: &str, expires_at: OffsetDateTime) -> AuthResult<bool>;

    /// Removes entries whose expiry has passed.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn cleanup_expired(&self) -> AuthResult<u64>;
}
