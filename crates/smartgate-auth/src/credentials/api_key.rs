//! Opaque API keys.
//!
//! Raw keys look like `sgk_<43 base64url chars>`. Only the SHA-256 hash of
//! the raw key and its first eight characters (for display) are stored;
//! the raw key is returned once by [`ApiKeyManager::generate_key`] and can
//! never be recovered.

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::config::ApiKeyConfig;
use crate::error::AuthError;
use crate::smart::Scope;
use crate::storage::ApiKeyStorage;

/// Number of leading raw-key characters kept for display.
pub const DISPLAY_PREFIX_LEN: usize = 8;

/// Minimum length of imported raw keys.
const MIN_IMPORTED_KEY_LEN: usize = 24;

/// Lifecycle status. Transitions only from `Active` to `Revoked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyStatus {
    Active,
    Revoked,
}

/// A stored API key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub name: String,

    /// Hex SHA-256 of the raw key. Never serialized.
    #[serde(skip)]
    pub key_hash: String,

    /// First characters of the raw key, for display.
    pub prefix: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default)]
    pub scopes: Vec<String>,

    #[serde(default)]
    pub roles: Vec<String>,

    /// Requests per minute; enforced by the HTTP edge, not here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,

    pub status: ApiKeyStatus,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub expires_at: Option<OffsetDateTime>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub last_used_at: Option<OffsetDateTime>,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    /// Id of the key this one replaced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotated_from: Option<String>,
}

impl ApiKey {
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    #[must_use]
    pub fn is_revoked(&self) -> bool {
        self.status == ApiKeyStatus::Revoked
    }
}

/// Parameters for a new key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewApiKey {
    pub name: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub rate_limit: Option<u32>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
}

/// A freshly minted key together with its raw material.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedApiKey {
    /// The raw key. Shown exactly once.
    #[serde(rename = "key")]
    pub raw_key: String,

    #[serde(flatten)]
    pub api_key: ApiKey,
}

/// API key lifecycle conditions.
///
/// Unlike client assertion failures these are intentionally distinct so
/// administrators can tell why a key stopped working.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiKeyError {
    #[error("invalid API key")]
    Invalid,

    #[error("API key has been revoked")]
    Revoked,

    #[error("API key has expired")]
    Expired,

    #[error("API key not found")]
    NotFound,

    #[error("invalid API key request: {0}")]
    InvalidRequest(String),

    #[error("API key storage error: {0}")]
    Storage(String),
}

impl From<ApiKeyError> for AuthError {
    fn from(err: ApiKeyError) -> Self {
        match err {
            ApiKeyError::Invalid | ApiKeyError::Revoked | ApiKeyError::Expired => {
                AuthError::unauthorized(err.to_string())
            }
            ApiKeyError::NotFound => AuthError::not_found(err.to_string()),
            ApiKeyError::InvalidRequest(message) => AuthError::invalid_request(message),
            ApiKeyError::Storage(message) => AuthError::storage(message),
        }
    }
}

/// Hex SHA-256 of a raw key.
#[must_use]
pub fn hash_api_key(raw_key: &str) -> String {
    hex::encode(Sha256::digest(raw_key.as_bytes()))
}

/// Creates, validates, revokes and rotates API keys.
#[derive(Clone)]
pub struct ApiKeyManager {
    storage: Arc<dyn ApiKeyStorage>,
    prefix: String,
}

impl ApiKeyManager {
    #[must_use]
    pub fn new(storage: Arc<dyn ApiKeyStorage>, config: &ApiKeyConfig) -> Self {
        Self {
            storage,
            prefix: config.prefix.clone(),
        }
    }

    /// Mints a key and returns its raw material once.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for an empty name or an unparseable scope.
    pub async fn generate_key(&self, request: NewApiKey) -> Result<GeneratedApiKey, ApiKeyError> {
        validate_request(&request)?;
        let raw_key = self.new_raw_key();
        let api_key = build_key(&raw_key, request, None);
        self.storage.insert(api_key.clone()).await?;

        tracing::info!(
            key_id = %api_key.id,
            prefix = %api_key.prefix,
            scopes = ?api_key.scopes,
            "API key generated"
        );
        Ok(GeneratedApiKey { raw_key, api_key })
    }

    /// Registers externally supplied raw key material, e.g. a bootstrap
    /// admin key from configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` if the raw key is too short or the request
    /// is invalid, and a storage error if the key already exists.
    pub async fn import_key(&self, raw_key: &str, request: NewApiKey) -> Result<ApiKey, ApiKeyError> {
        if raw_key.len() < MIN_IMPORTED_KEY_LEN {
            return Err(ApiKeyError::InvalidRequest(format!(
                "imported keys must be at least {MIN_IMPORTED_KEY_LEN} characters"
            )));
        }
        validate_request(&request)?;
        let api_key = build_key(raw_key, request, None);
        self.storage.insert(api_key.clone()).await?;
        tracing::info!(key_id = %api_key.id, prefix = %api_key.prefix, "API key imported");
        Ok(api_key)
    }

    /// Validates a presented raw key.
    ///
    /// # Errors
    ///
    /// Returns `Invalid` for unknown keys, `Revoked` or `Expired` for keys
    /// that exist but can no longer be used.
    pub async fn validate_key(&self, raw_key: &str) -> Result<ApiKey, ApiKeyError> {
        let hash = hash_api_key(raw_key);
        let mut key = self
            .storage
            .find_by_hash(&hash)
            .await?
            .ok_or(ApiKeyError::Invalid)?;

        if key.is_revoked() {
            return Err(ApiKeyError::Revoked);
        }
        let now = OffsetDateTime::now_utc();
        if key.is_expired_at(now) {
            return Err(ApiKeyError::Expired);
        }

        if let Err(e) = self.storage.touch(&key.id, now).await {
            tracing::debug!(key_id = %key.id, error = %e, "Failed to record API key use");
        }
        key.last_used_at = Some(now);
        Ok(key)
    }

    /// Revokes a key. Revoking twice is not an error.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the key does not exist.
    pub async fn revoke_key(&self, id: &str) -> Result<ApiKey, ApiKeyError> {
        let key = self.storage.revoke(id).await?;
        tracing::info!(key_id = %id, "API key revoked");
        Ok(key)
    }

    /// Revokes a key and mints a replacement with the same configuration.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `Revoked` if the old key cannot be rotated.
    pub async fn rotate_key(&self, id: &str) -> Result<GeneratedApiKey, ApiKeyError> {
        let old = self
            .storage
            .find_by_id(id)
            .await?
            .ok_or(ApiKeyError::NotFound)?;
        if old.is_revoked() {
            return Err(ApiKeyError::Revoked);
        }

        let request = NewApiKey {
            name: old.name.clone(),
            tenant_id: old.tenant_id.clone(),
            client_id: old.client_id.clone(),
            scopes: old.scopes.clone(),
            roles: old.roles.clone(),
            rate_limit: old.rate_limit,
            expires_at: old.expires_at,
        };
        let raw_key = self.new_raw_key();
        let api_key = build_key(&raw_key, request, Some(old.id.clone()));
        self.storage.rotate(&old.id, api_key.clone()).await?;

        tracing::info!(old_key_id = %old.id, new_key_id = %api_key.id, "API key rotated");
        Ok(GeneratedApiKey { raw_key, api_key })
    }

    /// Returns a key by id.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the key does not exist.
    pub async fn get_key(&self, id: &str) -> Result<ApiKey, ApiKeyError> {
        self.storage
            .find_by_id(id)
            .await?
            .ok_or(ApiKeyError::NotFound)
    }

    /// Lists all keys, newest first.
    ///
    /// # Errors
    ///
    /// Returns a storage error if listing fails.
    pub async fn list_keys(&self) -> Result<Vec<ApiKey>, ApiKeyError> {
        let mut keys = self.storage.list().await?;
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(keys)
    }

    fn new_raw_key(&self) -> String {
        let mut bytes = [0u8; 32];
        rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
        format!("{}_{}", self.prefix, URL_SAFE_NO_PAD.encode(bytes))
    }
}

fn validate_request(request: &NewApiKey) -> Result<(), ApiKeyError> {
    if request.name.trim().is_empty() {
        return Err(ApiKeyError::InvalidRequest("name must not be empty".to_string()));
    }
    if let Some(scope) = request.scopes.iter().find(|s| Scope::parse(s).is_err()) {
        return Err(ApiKeyError::InvalidRequest(format!("invalid scope: {scope}")));
    }
    Ok(())
}

fn build_key(raw_key: &str, request: NewApiKey, rotated_from: Option<String>) -> ApiKey {
    ApiKey {
        id: uuid::Uuid::new_v4().to_string(),
        name: request.name,
        key_hash: hash_api_key(raw_key),
        prefix: raw_key.chars().take(DISPLAY_PREFIX_LEN).collect(),
        tenant_id: request.tenant_id,
        client_id: request.client_id,
        scopes: request.scopes,
        roles: request.roles,
        rate_limit: request.rate_limit,
        status: ApiKeyStatus::Active,
        expires_at: request.expires_at,
        last_used_at: None,
        created_at: OffsetDateTime::now_utc(),
        rotated_from,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemoryApiKeyStorage;
    use std::time::Duration;

    fn manager() -> ApiKeyManager {
        ApiKeyManager::new(
            Arc::new(InMemoryApiKeyStorage::new()),
            &ApiKeyConfig::default(),
        )
    }

    fn request() -> NewApiKey {
        NewApiKey {
            name: "lab-integration".to_string(),
            tenant_id: Some("tenant-a".to_string()),
            scopes: vec!["patient/*.read".to_string()],
            rate_limit: Some(600),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_generate_and_validate() {
        let manager = manager();
        let generated = manager.generate_key(request()).await.unwrap();
        assert!(generated.raw_key.starts_with("sgk_"));
        assert_eq!(generated.api_key.prefix, &generated.raw_key[..8]);
        assert_ne!(generated.api_key.key_hash, generated.raw_key);

        let key = manager.validate_key(&generated.raw_key).await.unwrap();
        assert_eq!(key.id, generated.api_key.id);
        assert_eq!(key.scopes, vec!["patient/*.read"]);
        assert!(key.last_used_at.is_some());

        let stored = manager.get_key(&key.id).await.unwrap();
        assert!(stored.last_used_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_key_invalid() {
        let manager = manager();
        assert_eq!(
            manager.validate_key("sgk_doesnotexist").await.unwrap_err(),
            ApiKeyError::Invalid
        );
    }

    #[tokio::test]
    async fn test_revoked_key_rejected_and_revoke_idempotent() {
        let manager = manager();
        let generated = manager.generate_key(request()).await.unwrap();

        manager.revoke_key(&generated.api_key.id).await.unwrap();
        let again = manager.revoke_key(&generated.api_key.id).await.unwrap();
        assert_eq!(again.status, ApiKeyStatus::Revoked);

        assert_eq!(
            manager.validate_key(&generated.raw_key).await.unwrap_err(),
            ApiKeyError::Revoked
        );
        assert_eq!(
            manager.revoke_key("missing").await.unwrap_err(),
            ApiKeyError::NotFound
        );
    }

    #[tokio::test]
    async fn test_expired_key_rejected() {
        let manager = manager();
        let mut req = request();
        req.expires_at = Some(OffsetDateTime::now_utc() - Duration::from_secs(1));
        let generated = manager.generate_key(req).await.unwrap();
        assert_eq!(
            manager.validate_key(&generated.raw_key).await.unwrap_err(),
            ApiKeyError::Expired
        );
    }

    #[tokio::test]
    async fn test_rotate_preserves_configuration() {
        let manager = manager();
        let original = manager.generate_key(request()).await.unwrap();
        let rotated = manager.rotate_key(&original.api_key.id).await.unwrap();

        assert_ne!(rotated.raw_key, original.raw_key);
        assert_ne!(rotated.api_key.id, original.api_key.id);
        assert_eq!(rotated.api_key.scopes, original.api_key.scopes);
        assert_eq!(rotated.api_key.tenant_id, original.api_key.tenant_id);
        assert_eq!(rotated.api_key.rate_limit, Some(600));
        assert_eq!(rotated.api_key.rotated_from.as_deref(), Some(original.api_key.id.as_str()));

        assert_eq!(
            manager.validate_key(&original.raw_key).await.unwrap_err(),
            ApiKeyError::Revoked
        );
        assert!(manager.validate_key(&rotated.raw_key).await.is_ok());

        assert_eq!(
            manager.rotate_key(&original.api_key.id).await.unwrap_err(),
            ApiKeyError::Revoked
        );
    }

    #[tokio::test]
    async fn test_invalid_requests() {
        let manager = manager();
        let mut req = request();
        req.name = "  ".to_string();
        assert!(matches!(
            manager.generate_key(req).await,
            Err(ApiKeyError::InvalidRequest(_))
        ));

        let mut req = request();
        req.scopes = vec!["patient/*.nope".to_string()];
        assert!(matches!(
            manager.generate_key(req).await,
            Err(ApiKeyError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_import_key() {
        let manager = manager();
        let raw = "bootstrap-admin-key-0123456789";
        let key = manager
            .import_key(
                raw,
                NewApiKey {
                    name: "bootstrap".to_string(),
                    roles: vec!["admin".to_string()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(key.prefix, "bootstra");
        assert_eq!(manager.validate_key(raw).await.unwrap().roles, vec!["admin"]);

        assert!(manager.import_key("short", request()).await.is_err());
        assert!(manager.import_key(raw, request()).await.is_err());
    }

    #[tokio::test]
    async fn test_serialization_never_exposes_hash() {
        let manager = manager();
        let generated = manager.generate_key(request()).await.unwrap();
        let json = serde_json::to_value(&generated).unwrap();
        assert_eq!(json["key"], generated.raw_key.as_str());
        assert!(json.get("key_hash").is_none());

        let listed = serde_json::to_string(&manager.list_keys().await.unwrap()).unwrap();
        assert!(!listed.contains(&generated.api_key.key_hash));
        assert!(!listed.contains(&generated.raw_key));
    }

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(hash_api_key("abc"), hash_api_key("abc"));
        assert_ne!(hash_api_key("abc"), hash_api_key("abd"));
    }

    #[test]
    fn test_error_mapping() {
        let err: AuthError = ApiKeyError::Revoked.into();
        assert!(matches!(err, AuthError::Unauthorized { .. }));
        let err: AuthError = ApiKeyError::NotFound.into();
        assert!(matches!(err, AuthError::NotFound { .. }));
    }
}
