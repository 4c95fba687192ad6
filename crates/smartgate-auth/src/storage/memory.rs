//! In-memory storage backends.
//!
//! Every store is a `parking_lot::RwLock` around a `HashMap`. Operations
//! documented as atomic on the traits run under a single write guard.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use time::OffsetDateTime;

use super::{
    ApiKeyStorage, AuthorizationCodeStorage, ClientStorage, ConsentStorage, JtiStorage,
    LaunchContextStorage, RefreshTokenStorage,
};
use crate::AuthResult;
use crate::credentials::{ApiKey, ApiKeyError, ApiKeyStatus};
use crate::error::AuthError;
use crate::oauth::session::AuthorizationCode;
use crate::policy::ConsentDirective;
use crate::smart::StoredLaunchContext;
use crate::types::{Client, RefreshToken};

fn removed(before: usize, after: usize) -> u64 {
    (before - after) as u64
}

// =============================================================================
// Clients
// =============================================================================

#[derive(Debug, Default)]
pub struct InMemoryClientStorage {
    clients: RwLock<HashMap<String, Client>>,
}

impl InMemoryClientStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClientStorage for InMemoryClientStorage {
    async fn find_by_client_id(&self, client_id: &str) -> AuthResult<Option<Client>> {
        Ok(self.clients.read().get(client_id).cloned())
    }

    async fn create(&self, client: Client) -> AuthResult<Client> {
        let mut clients = self.clients.write();
        if clients.contains_key(&client.client_id) {
            return Err(AuthError::conflict(format!(
                "client '{}' already exists",
                client.client_id
            )));
        }
        clients.insert(client.client_id.clone(), client.clone());
        Ok(client)
    }
}

// =============================================================================
// Authorization codes
// =============================================================================

#[derive(Debug, Default)]
pub struct InMemoryAuthorizationCodeStorage {
    codes: RwLock<HashMap<String, AuthorizationCode>>,
}

impl InMemoryAuthorizationCodeStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuthorizationCodeStorage for InMemoryAuthorizationCodeStorage {
    async fn store(&self, code: AuthorizationCode) -> AuthResult<()> {
        self.codes.write().insert(code.code.clone(), code);
        Ok(())
    }

    async fn consume(&self, code: &str) -> AuthResult<Option<AuthorizationCode>> {
        Ok(self.codes.write().remove(code))
    }

    async fn cleanup_expired(&self) -> AuthResult<u64> {
        let mut codes = self.codes.write();
        let before = codes.len();
        codes.retain(|_, c| !c.is_expired());
        Ok(removed(before, codes.len()))
    }
}

// =============================================================================
// Launch contexts
// =============================================================================

#[derive(Debug, Default)]
pub struct InMemoryLaunchContextStorage {
    contexts: RwLock<HashMap<String, StoredLaunchContext>>,
}

impl InMemoryLaunchContextStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LaunchContextStorage for InMemoryLaunchContextStorage {
    async fn store(&self, context: StoredLaunchContext) -> AuthResult<()> {
        self.contexts
            .write()
            .insert(context.launch_id.clone(), context);
        Ok(())
    }

    async fn consume(&self, launch_id: &str) -> AuthResult<Option<StoredLaunchContext>> {
        Ok(self
            .contexts
            .write()
            .remove(launch_id)
            .filter(|c| !c.is_expired()))
    }

    async fn cleanup_expired(&self) -> AuthResult<u64> {
        let mut contexts = self.contexts.write();
        let before = contexts.len();
        contexts.retain(|_, c| !c.is_expired());
        Ok(removed(before, contexts.len()))
    }
}

// =============================================================================
// Refresh tokens
// =============================================================================

#[derive(Debug, Default)]
pub struct InMemoryRefreshTokenStorage {
    tokens: RwLock<HashMap<String, RefreshToken>>,
}

impl InMemoryRefreshTokenStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RefreshTokenStorage for InMemoryRefreshTokenStorage {
    async fn store(&self, token: RefreshToken) -> AuthResult<()> {
        self.tokens.write().insert(token.token_hash.clone(), token);
        Ok(())
    }

    async fn find_by_hash(&self, token_hash: &str) -> AuthResult<Option<RefreshToken>> {
        Ok(self.tokens.read().get(token_hash).cloned())
    }

    async fn delete(&self, token_hash: &str) -> AuthResult<bool> {
        Ok(self.tokens.write().remove(token_hash).is_some())
    }

    async fn cleanup_expired(&self) -> AuthResult<u64> {
        let mut tokens = self.tokens.write();
        let before = tokens.len();
        tokens.retain(|_, t| !t.is_expired());
        Ok(removed(before, tokens.len()))
    }
}

// =============================================================================
// Assertion replay cache
// =============================================================================

#[derive(Debug, Default)]
pub struct InMemoryJtiStorage {
    used: RwLock<HashMap<String, OffsetDateTime>>,
}

impl InMemoryJtiStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JtiStorage for InMemoryJtiStorage {
    async fn mark_used(&self, jti: &str, expires_at: OffsetDateTime) -> AuthResult<bool> {
        let now = OffsetDateTime::now_utc();
        let mut used = self.used.write();
        if used.get(jti).is_some_and(|exp| *exp > now) {
            return Ok(false);
        }
        used.insert(jti.to_string(), expires_at);
        Ok(true)
    }

    async fn cleanup_expired(&self) -> AuthResult<u64> {
        let now = OffsetDateTime::now_utc();
        let mut used = self.used.write();
        let before = used.len();
        used.retain(|_, exp| *exp > now);
        Ok(removed(before, used.len()))
    }
}

// =============================================================================
// Consent directives
// =============================================================================

#[derive(Debug, Default)]
pub struct InMemoryConsentStorage {
    directives: RwLock<HashMap<String, ConsentDirective>>,
}

impl InMemoryConsentStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store, e.g. from configuration.
    #[must_use]
    pub fn with_directives(directives: impl IntoIterator<Item = ConsentDirective>) -> Self {
        let map = directives.into_iter().map(|d| (d.id.clone(), d)).collect();
        Self {
            directives: RwLock::new(map),
        }
    }
}

#[async_trait]
impl ConsentStorage for InMemoryConsentStorage {
    async fn put(&self, directive: ConsentDirective) -> AuthResult<()> {
        self.directives
            .write()
            .insert(directive.id.clone(), directive);
        Ok(())
    }

    async fn directives_for_patient(
        &self,
        patient_id: &str,
    ) -> AuthResult<Vec<ConsentDirective>> {
        Ok(self
            .directives
            .read()
            .values()
            .filter(|d| d.patient_id == patient_id)
            .cloned()
            .collect())
    }
}

// =============================================================================
// API keys
// =============================================================================

#[derive(Debug, Default)]
struct ApiKeyState {
    by_id: HashMap<String, ApiKey>,
    /// key hash -> key id
    by_hash: HashMap<String, String>,
}

impl ApiKeyState {
    fn insert(&mut self, key: ApiKey) -> Result<(), ApiKeyError> {
        if self.by_id.contains_key(&key.id) || self.by_hash.contains_key(&key.key_hash) {
            return Err(ApiKeyError::Storage("duplicate API key".to_string()));
        }
        self.by_hash.insert(key.key_hash.clone(), key.id.clone());
        self.by_id.insert(key.id.clone(), key);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryApiKeyStorage {
    state: RwLock<ApiKeyState>,
}

impl InMemoryApiKeyStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApiKeyStorage for InMemoryApiKeyStorage {
    async fn insert(&self, key: ApiKey) -> Result<(), ApiKeyError> {
        self.state.write().insert(key)
    }

    async fn find_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, ApiKeyError> {
        let state = self.state.read();
        Ok(state
            .by_hash
            .get(key_hash)
            .and_then(|id| state.by_id.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<ApiKey>, ApiKeyError> {
        Ok(self.state.read().by_id.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<ApiKey>, ApiKeyError> {
        Ok(self.state.read().by_id.values().cloned().collect())
    }

    async fn revoke(&self, id: &str) -> Result<ApiKey, ApiKeyError> {
        let mut state = self.state.write();
        let key = state.by_id.get_mut(id).ok_or(ApiKeyError::NotFound)?;
        key.status = ApiKeyStatus::Revoked;
        Ok(key.clone())
    }

    async fn rotate(&self, old_id: &str, replacement: ApiKey) -> Result<(), ApiKeyError> {
        let mut state = self.state.write();
        match state.by_id.get(old_id) {
            None => return Err(ApiKeyError::NotFound),
            Some(old) if old.is_revoked() => return Err(ApiKeyError::Revoked),
            Some(_) => {}
        }
        // insert first so a duplicate leaves the old key untouched
        state.insert(replacement)?;
        if let Some(old) = state.by_id.get_mut(old_id) {
            old.status = ApiKeyStatus::Revoked;
        }
        Ok(())
    }

    async fn touch(&self, id: &str, at: OffsetDateTime) -> Result<(), ApiKeyError> {
        if let Some(key) = self.state.write().by_id.get_mut(id) {
            key.last_used_at = Some(at);
        }
        Ok(())
    }
}
