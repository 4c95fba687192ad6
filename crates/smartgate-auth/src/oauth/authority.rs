//! The SMART authorization server.
//!
//! [`TokenAuthority`] owns the authorization code, refresh token and launch
//! context lifecycle:
//!
//! ```text
//! issued (code) -> exchanged (tokens) -> [refreshed]* -> expired / revoked
//! ```
//!
//! Access tokens are HS256 JWTs and never persisted. Nothing here spawns
//! background work; expired entries are removed by [`TokenAuthority::sweep_expired`],
//! which the process drives through a [`MaintenanceTasks`](crate::tasks::MaintenanceTasks)
//! entry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::AuthResult;
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::oauth::authorize::{AuthorizationRequest, AuthorizationResponse, AuthorizeError};
use crate::oauth::pkce::{PkceChallenge, PkceChallengeMethod, PkceVerifier};
use crate::oauth::registration::{ClientRegistrationRequest, ClientRegistrationResponse};
use crate::oauth::session::{AuthorizationCode, generate_authorization_code};
use crate::oauth::token::{ClientCredentials, TokenRequest, TokenResponse};
use crate::smart::{LaunchContext, Scope, StoredLaunchContext, split_scopes};
use crate::storage::{
    AuthorizationCodeStorage, ClientStorage, InMemoryAuthorizationCodeStorage,
    InMemoryClientStorage, InMemoryLaunchContextStorage, InMemoryRefreshTokenStorage,
    LaunchContextStorage, RefreshTokenStorage,
};
use crate::tasks::Sweep;
use crate::token::{AccessTokenClaims, IntrospectionResponse, JwtService, new_jti};
use crate::types::{Client, RefreshToken, generate_refresh_token, hash_refresh_token};

const OFFLINE_ACCESS: &str = "offline_access";

/// Stores the authority depends on.
#[derive(Clone)]
pub struct AuthorityStorage {
    pub clients: Arc<dyn ClientStorage>,
    pub codes: Arc<dyn AuthorizationCodeStorage>,
    pub launch_contexts: Arc<dyn LaunchContextStorage>,
    pub refresh_tokens: Arc<dyn RefreshTokenStorage>,
}

impl AuthorityStorage {
    /// In-memory backends for every store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            clients: Arc::new(InMemoryClientStorage::new()),
            codes: Arc::new(InMemoryAuthorizationCodeStorage::new()),
            launch_contexts: Arc::new(InMemoryLaunchContextStorage::new()),
            refresh_tokens: Arc::new(InMemoryRefreshTokenStorage::new()),
        }
    }
}

/// Lifetimes used by the authority.
#[derive(Debug, Clone)]
pub struct AuthorityLifetimes {
    pub authorization_code: Duration,
    pub access_token: Duration,
    pub refresh_token: Duration,
    pub launch_context: Duration,
}

impl AuthorityLifetimes {
    #[must_use]
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            authorization_code: config.oauth.authorization_code_lifetime,
            access_token: config.oauth.access_token_lifetime,
            refresh_token: config.oauth.refresh_token_lifetime,
            launch_context: config.smart.launch_context_lifetime,
        }
    }
}

/// Entries removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepCounts {
    pub codes: u64,
    pub launch_contexts: u64,
    pub refresh_tokens: u64,
}

impl SweepCounts {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.codes + self.launch_contexts + self.refresh_tokens
    }
}

/// What an access token is being issued for.
struct Grant<'a> {
    client: &'a Client,
    subject: String,
    scope: String,
    context: LaunchContext,
    roles: Vec<String>,
}

/// Authorization code, refresh token and launch context flows.
#[derive(Clone)]
pub struct TokenAuthority {
    jwt: Arc<JwtService>,
    storage: AuthorityStorage,
    lifetimes: AuthorityLifetimes,
}

impl TokenAuthority {
    #[must_use]
    pub fn new(jwt: Arc<JwtService>, storage: AuthorityStorage, lifetimes: AuthorityLifetimes) -> Self {
        Self {
            jwt,
            storage,
            lifetimes,
        }
    }

    /// Replaces the launch context backend.
    #[must_use]
    pub fn with_launch_storage(mut self, launch_contexts: Arc<dyn LaunchContextStorage>) -> Self {
        self.storage.launch_contexts = launch_contexts;
        self
    }

    #[must_use]
    pub fn jwt(&self) -> &Arc<JwtService> {
        &self.jwt
    }

    #[must_use]
    pub fn client_storage(&self) -> &Arc<dyn ClientStorage> {
        &self.storage.clients
    }

    // =========================================================================
    // Clients and launch contexts
    // =========================================================================

    /// Registers a client.
    ///
    /// # Errors
    ///
    /// Returns `InvalidClientMetadata` if the client is malformed and
    /// `Conflict` if the id is taken.
    pub async fn register_client(&self, client: Client) -> AuthResult<Client> {
        client
            .validate()
            .map_err(|e| AuthError::invalid_client_metadata(e.to_string()))?;
        let client = self.storage.clients.create(client).await?;
        tracing::info!(
            client_id = %client.client_id,
            backend_service = client.is_backend_service(),
            "Client registered"
        );
        Ok(client)
    }

    /// Dynamic client registration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidClientMetadata` for unacceptable metadata.
    pub async fn register(
        &self,
        request: ClientRegistrationRequest,
    ) -> AuthResult<ClientRegistrationResponse> {
        let (client, response) = request.into_client()?;
        self.register_client(client).await?;
        Ok(response)
    }

    /// Stores a one-time EHR launch context.
    ///
    /// # Errors
    ///
    /// Returns an error if the launch store fails.
    pub async fn create_launch_context(
        &self,
        context: LaunchContext,
    ) -> AuthResult<StoredLaunchContext> {
        let stored = StoredLaunchContext::new(context, self.lifetimes.launch_context);
        self.storage.launch_contexts.store(stored.clone()).await?;
        tracing::debug!(
            patient = ?stored.context.patient,
            encounter = ?stored.context.encounter,
            "Launch context created"
        );
        Ok(stored)
    }

    // =========================================================================
    // Authorization endpoint
    // =========================================================================

    /// Validates an authorization request and issues a code.
    ///
    /// # Errors
    ///
    /// Errors raised before the client and redirect URI are verified are
    /// [`AuthorizeError::Direct`]; later ones carry the redirect target.
    pub async fn authorize(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<AuthorizationResponse, AuthorizeError> {
        if request.response_type != "code" {
            return Err(AuthError::unsupported_response_type(&request.response_type).into());
        }

        let client = self
            .storage
            .clients
            .find_by_client_id(&request.client_id)
            .await?
            .filter(|c| c.active)
            .ok_or_else(|| AuthError::invalid_client("unknown or inactive client"))?;
        if !client.is_interactive() {
            return Err(AuthError::invalid_client(
                "client is not permitted to use the authorization code flow",
            )
            .into());
        }
        if !client.is_redirect_uri_allowed(&request.redirect_uri) {
            tracing::warn!(
                client_id = %client.client_id,
                redirect_uri = %request.redirect_uri,
                "Unregistered redirect URI"
            );
            return Err(AuthError::invalid_request("redirect_uri is not registered").into());
        }

        let redirect = |error: AuthError| AuthorizeError::Redirect {
            redirect_uri: request.redirect_uri.clone(),
            state: request.state.clone(),
            error,
        };

        let scope = negotiate_scope(&client, &request.scope).map_err(redirect)?;
        let code_challenge = check_challenge(&client, request).map_err(redirect)?;

        let context = match request.launch.as_deref().filter(|l| !l.is_empty()) {
            Some(launch_id) => {
                let stored = self
                    .storage
                    .launch_contexts
                    .consume(launch_id)
                    .await
                    .map_err(redirect)?
                    .ok_or_else(|| {
                        redirect(AuthError::invalid_request("unknown or expired launch"))
                    })?;
                stored.context
            }
            None => LaunchContext::default(),
        };

        let now = OffsetDateTime::now_utc();
        let code = AuthorizationCode {
            code: generate_authorization_code(),
            client_id: client.client_id.clone(),
            redirect_uri: request.redirect_uri.clone(),
            scope,
            code_challenge,
            context,
            created_at: now,
            expires_at: now + self.lifetimes.authorization_code,
        };
        self.storage.codes.store(code.clone()).await.map_err(redirect)?;

        tracing::info!(client_id = %client.client_id, scope = %code.scope, "Authorization code issued");
        Ok(AuthorizationResponse {
            code: code.code,
            state: request.state.clone(),
            redirect_uri: request.redirect_uri.clone(),
        })
    }

    // =========================================================================
    // Token endpoint
    // =========================================================================

    /// Exchanges an authorization code for tokens.
    ///
    /// The code is removed before any validation, so a failed exchange
    /// still burns it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidGrant` for unknown, expired or mismatched codes and
    /// PKCE failures, `InvalidClient` for failed client authentication.
    pub async fn exchange_code(
        &self,
        request: &TokenRequest,
        credentials: &ClientCredentials,
    ) -> AuthResult<TokenResponse> {
        let code_value = TokenRequest::require(&request.code, "code")?;
        let redirect_uri = TokenRequest::require(&request.redirect_uri, "redirect_uri")?;

        let code = self
            .storage
            .codes
            .consume(code_value)
            .await?
            .ok_or_else(|| AuthError::invalid_grant("invalid authorization code"))?;

        if code.is_expired() {
            return Err(AuthError::invalid_grant("authorization code expired"));
        }
        if code.redirect_uri != redirect_uri {
            return Err(AuthError::invalid_grant("redirect_uri mismatch"));
        }
        if code.client_id != credentials.client_id {
            tracing::warn!(
                code_client = %code.client_id,
                presented = %credentials.client_id,
                "Authorization code presented by another client"
            );
            return Err(AuthError::invalid_grant("authorization code was issued to another client"));
        }

        let client = self.authenticate_interactive(credentials).await?;
        if !client.is_confidential() && code.code_challenge.is_none() {
            return Err(AuthError::invalid_grant("public clients must use PKCE"));
        }

        if let Some(challenge) = &code.code_challenge {
            let verifier = request
                .code_verifier
                .as_deref()
                .ok_or_else(|| AuthError::invalid_grant("code_verifier is required"))?;
            let verifier = PkceVerifier::new(verifier)
                .map_err(|e| AuthError::invalid_grant(e.to_string()))?;
            PkceChallenge::new(challenge.clone())
                .and_then(|c| c.verify(&verifier))
                .map_err(|e| {
                    if e.is_verification_error() {
                        AuthError::PkceVerificationFailed
                    } else {
                        AuthError::invalid_grant(e.to_string())
                    }
                })?;
        }

        let subject = code
            .context
            .user
            .clone()
            .unwrap_or_else(|| client.client_id.clone());
        let grant = Grant {
            client: &client,
            subject,
            scope: code.scope,
            context: code.context,
            roles: client.roles.clone(),
        };
        self.issue_tokens(grant, true).await
    }

    /// Issues a new access token for a refresh token.
    ///
    /// The refresh token is not rotated. `scope` may narrow the original
    /// grant but never widen it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidGrant` for unknown, expired or foreign refresh tokens,
    /// `InvalidScope` for a widened scope.
    pub async fn refresh_access_token(
        &self,
        refresh_token: &str,
        credentials: &ClientCredentials,
        scope: Option<&str>,
    ) -> AuthResult<TokenResponse> {
        let stored = self
            .storage
            .refresh_tokens
            .find_by_hash(&hash_refresh_token(refresh_token))
            .await?
            .ok_or_else(|| AuthError::invalid_grant("invalid refresh token"))?;

        if stored.is_expired() {
            return Err(AuthError::invalid_grant("refresh token expired"));
        }
        if stored.client_id != credentials.client_id {
            return Err(AuthError::invalid_grant("refresh token was issued to another client"));
        }
        let client = self.authenticate_interactive(credentials).await?;

        let scope = match scope.map(str::trim).filter(|s| !s.is_empty()) {
            None => stored.scope.clone(),
            Some(requested) => {
                let original = split_scopes(&stored.scope);
                let narrowed = split_scopes(requested);
                if let Some(extra) = narrowed.iter().find(|s| !original.contains(s)) {
                    return Err(AuthError::invalid_scope(format!(
                        "scope '{extra}' was not part of the original grant"
                    )));
                }
                narrowed.join(" ")
            }
        };

        let grant = Grant {
            client: &client,
            subject: stored.subject,
            scope,
            context: stored.context,
            roles: stored.roles,
        };
        tracing::debug!(client_id = %client.client_id, "Refreshing access token");
        self.issue_tokens(grant, false).await
    }

    async fn authenticate_interactive(&self, credentials: &ClientCredentials) -> AuthResult<Client> {
        let client = self
            .storage
            .clients
            .find_by_client_id(&credentials.client_id)
            .await?
            .filter(|c| c.active && c.is_interactive())
            .ok_or_else(|| AuthError::invalid_client("client authentication failed"))?;

        if client.is_confidential() {
            let ok = credentials
                .client_secret
                .as_deref()
                .is_some_and(|secret| client.verify_secret(secret));
            if !ok {
                tracing::debug!(client_id = %client.client_id, "Client secret mismatch");
                return Err(AuthError::invalid_client("client authentication failed"));
            }
        }
        Ok(client)
    }

    async fn issue_tokens(&self, grant: Grant<'_>, allow_refresh: bool) -> AuthResult<TokenResponse> {
        let lifetime = grant
            .client
            .access_token_lifetime
            .filter(|secs| *secs > 0)
            .map_or(self.lifetimes.access_token, |secs| {
                Duration::from_secs(secs.unsigned_abs())
            });
        let now = OffsetDateTime::now_utc();
        let claims = AccessTokenClaims {
            iss: self.jwt.issuer().to_string(),
            sub: grant.subject.clone(),
            aud: self.jwt.audience().to_string(),
            exp: (now + lifetime).unix_timestamp(),
            iat: now.unix_timestamp(),
            jti: new_jti(),
            scope: grant.scope.clone(),
            client_id: grant.client.client_id.clone(),
            patient: grant.context.patient.clone(),
            encounter: grant.context.encounter.clone(),
            fhir_user: grant.context.user.clone(),
            roles: grant.roles.clone(),
        };
        let access_token = self
            .jwt
            .encode(&claims)
            .map_err(|e| AuthError::internal(e.to_string()))?;

        let mut response = TokenResponse::new(access_token, lifetime.as_secs(), grant.scope.clone())
            .with_context(grant.context.patient.clone(), grant.context.encounter.clone());

        if allow_refresh && split_scopes(&grant.scope).iter().any(|s| s == OFFLINE_ACCESS) {
            let raw = generate_refresh_token();
            let record = RefreshToken {
                token_hash: hash_refresh_token(&raw),
                client_id: grant.client.client_id.clone(),
                subject: grant.subject,
                scope: grant.scope,
                context: grant.context,
                roles: grant.roles,
                created_at: now,
                expires_at: now + self.lifetimes.refresh_token,
            };
            self.storage.refresh_tokens.store(record).await?;
            response = response.with_refresh_token(raw);
        }

        tracing::info!(
            client_id = %claims.client_id,
            sub = %claims.sub,
            jti = %claims.jti,
            refresh = response.refresh_token.is_some(),
            "Access token issued"
        );
        Ok(response)
    }

    // =========================================================================
    // Introspection, revocation and maintenance
    // =========================================================================

    /// Introspects a local access token. Checks signature and expiry only;
    /// never errors.
    #[must_use]
    pub fn introspect_token(&self, token: &str) -> IntrospectionResponse {
        match self.jwt.decode(token) {
            Ok(claims) => IntrospectionResponse::from(claims),
            Err(e) => {
                tracing::debug!(error = %e, "Introspected token is inactive");
                IntrospectionResponse::inactive()
            }
        }
    }

    /// Deletes a refresh token. Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the refresh token store fails.
    pub async fn revoke_refresh_token(&self, token: &str) -> AuthResult<bool> {
        let removed = self
            .storage
            .refresh_tokens
            .delete(&hash_refresh_token(token))
            .await?;
        if removed {
            tracing::info!("Refresh token revoked");
        }
        Ok(removed)
    }

    /// Removes expired codes, launch contexts and refresh tokens.
    ///
    /// # Errors
    ///
    /// Returns the first storage error encountered.
    pub async fn sweep_expired(&self) -> AuthResult<SweepCounts> {
        Ok(SweepCounts {
            codes: self.storage.codes.cleanup_expired().await?,
            launch_contexts: self.storage.launch_contexts.cleanup_expired().await?,
            refresh_tokens: self.storage.refresh_tokens.cleanup_expired().await?,
        })
    }
}

#[async_trait]
impl Sweep for TokenAuthority {
    fn name(&self) -> &'static str {
        "token-authority"
    }

    async fn sweep(&self) -> AuthResult<u64> {
        Ok(self.sweep_expired().await?.total())
    }
}

/// Intersects requested scopes with the client's allowed scopes.
fn negotiate_scope(client: &Client, requested: &str) -> AuthResult<String> {
    let requested = split_scopes(requested);
    if let Some(bad) = requested.iter().find(|s| Scope::parse(s).is_err()) {
        return Err(AuthError::invalid_scope(format!("invalid scope: {bad}")));
    }
    let granted: Vec<_> = requested
        .into_iter()
        .filter(|s| client.is_scope_allowed(s))
        .collect();
    if granted.is_empty() {
        return Err(AuthError::invalid_scope("no requested scope is allowed for this client"));
    }
    Ok(granted.join(" "))
}

/// Validates the PKCE challenge of an authorization request.
fn check_challenge(client: &Client, request: &AuthorizationRequest) -> AuthResult<Option<String>> {
    let Some(challenge) = request.code_challenge.as_deref().filter(|c| !c.is_empty()) else {
        if client.is_confidential() {
            return Ok(None);
        }
        return Err(AuthError::invalid_request("code_challenge is required for public clients"));
    };

    let method = request.code_challenge_method.as_deref().unwrap_or("plain");
    PkceChallengeMethod::parse(method).map_err(|e| AuthError::invalid_request(e.to_string()))?;
    let challenge =
        PkceChallenge::new(challenge).map_err(|e| AuthError::invalid_request(e.to_string()))?;
    Ok(Some(challenge.into_inner()))
}
