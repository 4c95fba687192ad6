//! Remote signing key cache.
//!
//! Keys of an external identity provider are fetched from its JWKS endpoint
//! and served from memory until the TTL lapses. An unknown `kid` always
//! triggers one refetch before failing, so provider key rotation is picked
//! up without waiting for the TTL.

use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{Jwk, JwkSet};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::FederationConfig;
use crate::error::AuthError;

/// Errors that can occur while resolving a signing key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyCacheError {
    /// The HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Client(String),

    /// The request failed or timed out.
    #[error("Network error: {0}")]
    Network(String),

    /// The endpoint answered with a non-success status.
    #[error("HTTP error: status {0}")]
    Status(u16),

    /// The body was not a key set.
    #[error("Failed to parse JWKS: {0}")]
    Parse(String),

    /// The URI is not https and plain http was not allowed.
    #[error("JWKS URI must use https, got '{0}'")]
    InsecureScheme(String),

    /// The body exceeded the configured size.
    #[error("JWKS response exceeds {max_size} bytes")]
    ResponseTooLarge { max_size: usize },

    /// The key is absent even after a refresh.
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// The caller gave up before the key was resolved.
    #[error("Key lookup cancelled")]
    Cancelled,
}

impl From<KeyCacheError> for AuthError {
    fn from(err: KeyCacheError) -> Self {
        match err {
            KeyCacheError::KeyNotFound(_) | KeyCacheError::Cancelled => {
                AuthError::invalid_token(err.to_string())
            }
            other => AuthError::key_source(other.to_string()),
        }
    }
}

struct CachedKeySet {
    keys: JwkSet,
    fetched_at: Instant,
}

/// Default cap on a key set body.
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 1024 * 1024;

/// TTL cache over a single JWKS endpoint.
pub struct KeyCache {
    http_client: reqwest::Client,
    jwks_uri: Url,
    ttl: Duration,
    max_response_bytes: usize,
    allow_http: bool,
    cached: RwLock<Option<CachedKeySet>>,
}

impl KeyCache {
    /// Creates an empty cache. Nothing is fetched until the first lookup.
    ///
    /// # Errors
    ///
    /// Returns `KeyCacheError::Client` if the HTTP client cannot be built.
    pub fn new(jwks_uri: Url, ttl: Duration, fetch_timeout: Duration) -> Result<Self, KeyCacheError> {
        let http_client = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .build()
            .map_err(|e| KeyCacheError::Client(e.to_string()))?;

        Ok(Self {
            http_client,
            jwks_uri,
            ttl,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            allow_http: false,
            cached: RwLock::new(None),
        })
    }

    /// Caps the size of a fetched key set.
    #[must_use]
    pub fn with_max_response_bytes(mut self, max: usize) -> Self {
        self.max_response_bytes = max;
        self
    }

    /// Accepts `http://` URIs. Only for testing.
    #[must_use]
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }

    /// Builds the cache for the configured provider, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the JWKS URI is not a URL or the HTTP client
    /// cannot be built.
    pub fn from_config(config: &FederationConfig) -> Result<Option<Self>, KeyCacheError> {
        let Some(uri) = &config.jwks_uri else {
            return Ok(None);
        };
        let uri = Url::parse(uri).map_err(|e| KeyCacheError::Client(e.to_string()))?;
        let cache = Self::new(uri, config.jwks_cache_ttl, config.fetch_timeout)?
            .with_max_response_bytes(config.max_response_bytes)
            .with_allow_http(config.allow_insecure_http);
        cache.validate_scheme()?;
        Ok(Some(cache))
    }

    #[must_use]
    pub fn jwks_uri(&self) -> &Url {
        &self.jwks_uri
    }

    /// Returns the key with the given `kid`.
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if the key is absent after a refresh, or the
    /// fetch error if the refresh itself fails.
    pub async fn get_key(&self, kid: &str) -> Result<Jwk, KeyCacheError> {
        if let Some(key) = self.cached_key(kid).await {
            tracing::trace!(kid = %kid, "JWKS cache hit");
            return Ok(key);
        }

        tracing::debug!(kid = %kid, jwks_uri = %self.jwks_uri, "JWKS cache miss, refreshing");
        self.refresh().await?;

        self.cached_key(kid)
            .await
            .ok_or_else(|| KeyCacheError::KeyNotFound(kid.to_string()))
    }

    /// Same as [`get_key`](Self::get_key), abandoned with
    /// `KeyCacheError::Cancelled` as soon as `token` fires.
    ///
    /// # Errors
    ///
    /// As `get_key`, plus `Cancelled`.
    pub async fn get_key_cancellable(
        &self,
        kid: &str,
        token: &CancellationToken,
    ) -> Result<Jwk, KeyCacheError> {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!(kid = %kid, "Key lookup cancelled");
                Err(KeyCacheError::Cancelled)
            }
            result = self.get_key(kid) => result,
        }
    }

    async fn cached_key(&self, kid: &str) -> Option<Jwk> {
        let cached = self.cached.read().await;
        let entry = cached.as_ref()?;
        if entry.fetched_at.elapsed() >= self.ttl {
            return None;
        }
        entry.keys.find(kid).cloned()
    }

    /// Fetches the key set and replaces the cache wholesale.
    ///
    /// # Errors
    ///
    /// Returns an error if the URI is not https (unless allowed), the
    /// request fails or times out, the status is not a success, the body is
    /// larger than the cap, or the body is not a key set.
    pub async fn refresh(&self) -> Result<(), KeyCacheError> {
        self.validate_scheme()?;

        let mut response = self
            .http_client
            .get(self.jwks_uri.as_str())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(jwks_uri = %self.jwks_uri, error = %e, "Failed to fetch JWKS");
                KeyCacheError::Network(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(jwks_uri = %self.jwks_uri, status = status.as_u16(), "JWKS endpoint error");
            return Err(KeyCacheError::Status(status.as_u16()));
        }

        let max_size = self.max_response_bytes;
        if let Some(len) = response.content_length()
            && len > max_size as u64
        {
            tracing::warn!(jwks_uri = %self.jwks_uri, len, max_size, "JWKS response too large");
            return Err(KeyCacheError::ResponseTooLarge { max_size });
        }

        // content-length may be absent or wrong; bound the read itself
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| KeyCacheError::Network(e.to_string()))?
        {
            if body.len() + chunk.len() > max_size {
                tracing::warn!(jwks_uri = %self.jwks_uri, max_size, "JWKS response too large");
                return Err(KeyCacheError::ResponseTooLarge { max_size });
            }
            body.extend_from_slice(&chunk);
        }

        let keys: JwkSet =
            serde_json::from_slice(&body).map_err(|e| KeyCacheError::Parse(e.to_string()))?;
        tracing::debug!(jwks_uri = %self.jwks_uri, keys = keys.keys.len(), "JWKS refreshed");

        *self.cached.write().await = Some(CachedKeySet {
            keys,
            fetched_at: Instant::now(),
        });
        Ok(())
    }

    fn validate_scheme(&self) -> Result<(), KeyCacheError> {
        match self.jwks_uri.scheme() {
            "https" => Ok(()),
            "http" if self.allow_http => Ok(()),
            scheme => Err(KeyCacheError::InsecureScheme(scheme.to_string())),
        }
    }

    /// Number of keys currently cached, expired or not.
    pub async fn len(&self) -> usize {
        self.cached
            .read()
            .await
            .as_ref()
            .map_or(0, |c| c.keys.keys.len())
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MODULUS: &str = "0vx7agoebGcQSuuPiLJXZptN9nndrQmbXEps2aiAFbWhM78LhWx4cbbfAAtVT86zwu1RK7aPFFxuhDR1L6tSoc_BJECPebWKRXjBZCiFV4n3oknjhMstn64tZ_2W-5JsGY4Hc5n9yBXArwl93lqt7_RN5w6Cf0h4QyQ5v-65YGjQR0_FDW2QvzqY368QQMicAtaSqzs8KJZgnYb9c7d0zgdAZHzu6qMQvRL5hajrn1n91CbOpbISD08qNLyrdkt-bFTWhAI4vMQFh6WeZu0fM4lFd2NcRwr3XPksINHaQ-G_xBniIqbw0Ls1jF44-csFCur-kEgU8awapJzKnqDKgw";

    fn key_set(kids: &[&str]) -> serde_json::Value {
        let keys: Vec<_> = kids
            .iter()
            .map(|kid| {
                json!({
                    "kty": "RSA",
                    "kid": kid,
                    "use": "sig",
                    "alg": "RS256",
                    "n": MODULUS,
                    "e": "AQAB",
                })
            })
            .collect();
        json!({ "keys": keys })
    }

    async fn cache_for(server: &MockServer, ttl: Duration, timeout: Duration) -> KeyCache {
        let uri = Url::parse(&format!("{}/jwks", server.uri())).unwrap();
        KeyCache::new(uri, ttl, timeout).unwrap().with_allow_http(true)
    }

    // -------------------------------------------------------------------------
    // Caching
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_fresh_cache_serves_without_refetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(key_set(&["k1", "k2"])))
            .expect(1)
            .mount(&server)
            .await;

        let cache = cache_for(&server, Duration::from_secs(3600), Duration::from_secs(5)).await;
        let key = cache.get_key("k1").await.unwrap();
        assert_eq!(key.common.key_id.as_deref(), Some("k1"));
        cache.get_key("k2").await.unwrap();
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_expired_cache_refetches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(key_set(&["k1"])))
            .expect(2)
            .mount(&server)
            .await;

        let cache = cache_for(&server, Duration::ZERO, Duration::from_secs(5)).await;
        cache.get_key("k1").await.unwrap();
        cache.get_key("k1").await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_kid_forces_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(key_set(&["old"])))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(key_set(&["new"])))
            .mount(&server)
            .await;

        let cache = cache_for(&server, Duration::from_secs(3600), Duration::from_secs(5)).await;
        cache.get_key("old").await.unwrap();

        // rotated: the refetched set replaces the old one entirely
        cache.get_key("new").await.unwrap();
        assert_eq!(cache.len().await, 1);
        assert_eq!(
            cache.get_key("gone").await.unwrap_err(),
            KeyCacheError::KeyNotFound("gone".to_string())
        );
    }

    // -------------------------------------------------------------------------
    // Failures
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_http_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let cache = cache_for(&server, Duration::from_secs(60), Duration::from_secs(5)).await;
        assert_eq!(cache.get_key("k1").await.unwrap_err(), KeyCacheError::Status(503));
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let cache = cache_for(&server, Duration::from_secs(60), Duration::from_secs(5)).await;
        assert!(matches!(
            cache.get_key("k1").await.unwrap_err(),
            KeyCacheError::Parse(_)
        ));
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(key_set(&["k1"]))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let cache = cache_for(&server, Duration::from_secs(60), Duration::from_millis(100)).await;
        assert!(matches!(
            cache.get_key("k1").await.unwrap_err(),
            KeyCacheError::Network(_)
        ));
    }

    #[tokio::test]
    async fn test_cancellation_fails_closed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(key_set(&["k1"]))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let cache = cache_for(&server, Duration::from_secs(60), Duration::from_secs(10)).await;
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = cache.get_key_cancellable("k1", &token).await.unwrap_err();
        assert_eq!(err, KeyCacheError::Cancelled);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(key_set(&["k1", "k2", "k3"])))
            .mount(&server)
            .await;

        let cache = cache_for(&server, Duration::from_secs(60), Duration::from_secs(5))
            .await
            .with_max_response_bytes(256);
        assert_eq!(
            cache.get_key("k1").await.unwrap_err(),
            KeyCacheError::ResponseTooLarge { max_size: 256 }
        );
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_plain_http_rejected_unless_allowed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(key_set(&["k1"])))
            .expect(0)
            .mount(&server)
            .await;

        let uri = Url::parse(&format!("{}/jwks", server.uri())).unwrap();
        let cache = KeyCache::new(uri, Duration::from_secs(60), Duration::from_secs(5)).unwrap();
        assert_eq!(
            cache.get_key("k1").await.unwrap_err(),
            KeyCacheError::InsecureScheme("http".to_string())
        );

        let config = FederationConfig {
            jwks_uri: Some(format!("{}/jwks", server.uri())),
            ..FederationConfig::default()
        };
        assert!(matches!(
            KeyCache::from_config(&config),
            Err(KeyCacheError::InsecureScheme(_))
        ));
    }

    #[test]
    fn test_error_conversion() {
        let err: AuthError = KeyCacheError::KeyNotFound("k".to_string()).into();
        assert_eq!(err.oauth_error_code(), "invalid_token");
        let err: AuthError = KeyCacheError::Status(500).into();
        assert!(err.is_server_error());
    }

    #[test]
    fn test_from_config_without_uri() {
        let config = FederationConfig::default();
        assert!(KeyCache::from_config(&config).unwrap().is_none());
    }
}
