//! SMART backend services authentication.
//!
//! Backend clients authenticate at the token endpoint with a short-lived
//! RS384 JWT signed by one of their registered keys, then receive an access
//! token for their pre-granted `system/` scopes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use time::OffsetDateTime;

use crate::AuthResult;
use crate::backend::assertion::{ClientAssertionClaims, parse_unverified};
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::oauth::token::TokenResponse;
use crate::smart::split_scopes;
use crate::storage::{ClientStorage, JtiStorage};
use crate::tasks::Sweep;
use crate::token::{AccessTokenClaims, JwtService, new_jti};
use crate::types::{Client, ClientKind};

/// The only error message a caller ever sees.
const GENERIC_FAILURE: &str = "client authentication failed";

/// Assertion validation settings.
#[derive(Debug, Clone)]
pub struct BackendAuthConfig {
    /// Expected `aud`.
    pub token_endpoint: String,
    /// Longest accepted distance between now and `exp`.
    pub max_assertion_lifetime: Duration,
    pub clock_skew: Duration,
    pub access_token_lifetime: Duration,
}

impl BackendAuthConfig {
    #[must_use]
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            token_endpoint: config.token_endpoint(),
            max_assertion_lifetime: config.backend.max_assertion_lifetime,
            clock_skew: config.backend.clock_skew,
            access_token_lifetime: config.backend.access_token_lifetime,
        }
    }
}

/// Authenticates backend-service clients by JWT assertion.
#[derive(Clone)]
pub struct BackendServiceAuthenticator {
    config: BackendAuthConfig,
    clients: Arc<dyn ClientStorage>,
    replay_cache: Arc<dyn JtiStorage>,
    jwt: Arc<JwtService>,
}

impl BackendServiceAuthenticator {
    #[must_use]
    pub fn new(
        config: BackendAuthConfig,
        clients: Arc<dyn ClientStorage>,
        replay_cache: Arc<dyn JtiStorage>,
        jwt: Arc<JwtService>,
    ) -> Self {
        Self {
            config,
            clients,
            replay_cache,
            jwt,
        }
    }

    /// Validates a client assertion and returns the authenticated client.
    ///
    /// # Errors
    ///
    /// Every failure is `InvalidClient` with the same generic message; the
    /// specific reason is logged at debug level only.
    pub async fn authenticate_client(&self, assertion: &str) -> AuthResult<Client> {
        match self.check_assertion(assertion).await {
            Ok(client) => {
                tracing::info!(client_id = %client.client_id, "Backend client authenticated");
                Ok(client)
            }
            Err(Rejection::Replay(jti)) => {
                tracing::warn!(jti = %jti, "Client assertion replayed");
                Err(AuthError::invalid_client(GENERIC_FAILURE))
            }
            Err(Rejection::Invalid(reason)) => {
                tracing::debug!(reason = %reason, "Client assertion rejected");
                Err(AuthError::invalid_client(GENERIC_FAILURE))
            }
            Err(Rejection::Storage(e)) => {
                tracing::warn!(error = %e, "Client assertion check failed");
                Err(AuthError::invalid_client(GENERIC_FAILURE))
            }
        }
    }

    async fn check_assertion(&self, assertion: &str) -> Result<Client, Rejection> {
        let claims = parse_unverified(assertion).map_err(Rejection::Invalid)?;
        let (client_id, jti, exp) = self.check_claims(&claims)?;

        let client = self
            .clients
            .find_by_client_id(&client_id)
            .await
            .map_err(Rejection::Storage)?
            .ok_or_else(|| Rejection::invalid(format!("unknown client {client_id}")))?;
        if !client.active {
            return Err(Rejection::invalid("client is inactive"));
        }
        let ClientKind::BackendService { jwks } = &client.kind else {
            return Err(Rejection::invalid("client is not a backend service"));
        };

        let expires_at = OffsetDateTime::from_unix_timestamp(exp)
            .map_err(|_| Rejection::invalid("exp out of range"))?;
        let first_use = self
            .replay_cache
            .mark_used(&jti, expires_at)
            .await
            .map_err(Rejection::Storage)?;
        if !first_use {
            return Err(Rejection::Replay(jti));
        }

        self.verify_signature(assertion, jwks, &client_id)?;
        Ok(client)
    }

    fn check_claims(&self, claims: &ClientAssertionClaims) -> Result<(String, String, i64), Rejection> {
        let iss = claims
            .iss
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Rejection::invalid("iss is missing"))?;
        if claims.sub.as_deref() != Some(iss.as_str()) {
            return Err(Rejection::invalid("sub must equal iss"));
        }
        if !claims
            .aud
            .as_ref()
            .is_some_and(|aud| aud.contains(&self.config.token_endpoint))
        {
            return Err(Rejection::invalid("aud does not name the token endpoint"));
        }
        let jti = claims
            .jti
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Rejection::invalid("jti is missing"))?;
        let exp = claims.exp.ok_or_else(|| Rejection::invalid("exp is missing"))?;

        let now = OffsetDateTime::now_utc().unix_timestamp();
        if exp <= now {
            return Err(Rejection::invalid("assertion expired"));
        }
        let horizon = self.config.max_assertion_lifetime + self.config.clock_skew;
        if exp > now.saturating_add(horizon.as_secs().try_into().unwrap_or(i64::MAX)) {
            return Err(Rejection::invalid("exp is too far in the future"));
        }
        Ok((iss, jti, exp))
    }

    fn verify_signature(&self, assertion: &str, jwks: &JwkSet, client_id: &str) -> Result<(), Rejection> {
        let header = jsonwebtoken::decode_header(assertion)
            .map_err(|e| Rejection::invalid(format!("bad header: {e}")))?;
        if header.alg != Algorithm::RS384 {
            return Err(Rejection::invalid(format!("unsupported alg {:?}", header.alg)));
        }

        let jwk = select_key(jwks, header.kid.as_deref())
            .ok_or_else(|| Rejection::invalid("no matching registered key"))?;
        let key = DecodingKey::from_jwk(jwk)
            .map_err(|e| Rejection::invalid(format!("unusable registered key: {e}")))?;

        let mut validation = Validation::new(Algorithm::RS384);
        validation.leeway = self.config.clock_skew.as_secs();
        validation.set_required_spec_claims(&["exp", "iss", "sub", "aud"]);
        validation.set_issuer(&[client_id]);
        validation.set_audience(&[&self.config.token_endpoint]);

        jsonwebtoken::decode::<serde_json::Value>(assertion, &key, &validation)
            .map(|_| ())
            .map_err(|e| Rejection::invalid(format!("signature verification failed: {e}")))
    }

    /// Issues an access token for an authenticated backend client.
    ///
    /// Each requested scope must be one of the client's granted scopes; an
    /// empty request grants all of them.
    ///
    /// # Errors
    ///
    /// Returns `InvalidScope` for scopes outside the client's grant.
    pub fn issue_access_token(&self, client: &Client, requested: Option<&str>) -> AuthResult<TokenResponse> {
        let requested = requested.map(split_scopes).unwrap_or_default();
        let scopes = if requested.is_empty() {
            client.scopes.clone()
        } else {
            if let Some(extra) = requested.iter().find(|s| !client.scopes.contains(s)) {
                return Err(AuthError::invalid_scope(format!(
                    "scope '{extra}' is not granted to this client"
                )));
            }
            requested
        };
        if scopes.is_empty() {
            return Err(AuthError::invalid_scope("client has no granted scopes"));
        }

        let lifetime = client
            .access_token_lifetime
            .filter(|secs| *secs > 0)
            .map_or(self.config.access_token_lifetime, |secs| {
                Duration::from_secs(secs.unsigned_abs())
            });
        let now = OffsetDateTime::now_utc();
        let scope = scopes.join(" ");
        let claims = AccessTokenClaims {
            iss: self.jwt.issuer().to_string(),
            sub: client.client_id.clone(),
            aud: self.jwt.audience().to_string(),
            exp: (now + lifetime).unix_timestamp(),
            iat: now.unix_timestamp(),
            jti: new_jti(),
            scope: scope.clone(),
            client_id: client.client_id.clone(),
            patient: None,
            encounter: None,
            fhir_user: None,
            roles: client.roles.clone(),
        };
        let token = self
            .jwt
            .encode(&claims)
            .map_err(|e| AuthError::internal(e.to_string()))?;

        tracing::info!(client_id = %client.client_id, jti = %claims.jti, scope = %scope, "Backend access token issued");
        Ok(TokenResponse::new(token, lifetime.as_secs(), scope))
    }

    /// Removes expired replay cache entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the replay cache fails.
    pub async fn sweep_replay_cache(&self) -> AuthResult<u64> {
        self.replay_cache.cleanup_expired().await
    }
}

#[async_trait]
impl Sweep for BackendServiceAuthenticator {
    fn name(&self) -> &'static str {
        "assertion-replay-cache"
    }

    async fn sweep(&self) -> AuthResult<u64> {
        self.sweep_replay_cache().await
    }
}

/// Key named by `kid`, or the only registered key when `kid` is absent.
fn select_key<'a>(jwks: &'a JwkSet, kid: Option<&str>) -> Option<&'a Jwk> {
    match kid {
        Some(kid) => jwks.find(kid),
        None if jwks.keys.len() == 1 => jwks.keys.first(),
        None => None,
    }
}

enum Rejection {
    Invalid(String),
    Replay(String),
    Storage(AuthError),
}

impl Rejection {
    fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid(reason.into())
    }
}
