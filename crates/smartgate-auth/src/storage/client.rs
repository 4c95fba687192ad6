//! Client registry.

use async_trait::async_trait;

use crate::AuthResult;
use crate::types::Client;

/// Storage for registered OAuth clients.
#[async_trait]
pub trait ClientStorage: Send + Sync {
    /// Finds a client by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_client_id(&self, client_id: &str) -> AuthResult<Option<Client>>;

    /// Registers a new client.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Conflict` if the client id is taken.
    async fn create(&self, client: Client) -> AuthResult<Client>;
}
