//! Launch context storage.

use async_trait::async_trait;

use crate::AuthResult;
use crate::smart::StoredLaunchContext;

/// Storage for EHR launch contexts awaiting `/authorize`.
///
/// Backends are pluggable; the authorization server only depends on this
/// trait.
#[async_trait]
pub trait LaunchContextStorage: Send + Sync {
    /// Stores a context until its `expires_at`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn store(&self, context: StoredLaunchContext) -> AuthResult<()>;

    /// Removes and returns an unexpired context.
    ///
    /// # Atomicity
    ///
    /// A context is handed out at most once. Expired contexts are removed
    /// and reported as absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn consume(&self, launch_id: &str) -> AuthResult<Option<StoredLaunchContext>>;

    /// Removes expired contexts.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn cleanup_expired(&self) -> AuthResult<u64>;
}
