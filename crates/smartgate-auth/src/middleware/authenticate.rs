//! Request authentication.
//!
//! A request carries one of three credentials:
//!
//! 1. `X-API-Key: <raw key>`
//! 2. `Authorization: Bearer <HS256 token>` issued by this server
//! 3. `Authorization: Bearer <asymmetric token>` from the external provider
//!
//! Whichever it is, the result is a [`RequestIdentity`] that then goes
//! through the revocation check.

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
};
use jsonwebtoken::Algorithm;
use time::OffsetDateTime;

use crate::AuthResult;
use crate::error::AuthError;
use crate::identity::RequestIdentity;
use crate::services::AuthServices;
use crate::token::JwtError;

/// Header carrying an opaque API key.
pub const API_KEY_HEADER: &str = "x-api-key";

// =============================================================================
// Credential extraction
// =============================================================================

/// Returns the token of an `Authorization: Bearer` header.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

fn api_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Resolves the caller of a request and applies the revocation check.
///
/// # Errors
///
/// - `Unauthorized` when no credential is present or an API key is invalid,
///   revoked or expired
/// - `InvalidToken` / `TokenExpired` for bad bearer tokens
/// - `TokenRevoked` when the token's `jti` is denylisted
/// - `KeySource` when the external key set cannot be fetched
pub async fn authenticate(services: &AuthServices, headers: &HeaderMap) -> AuthResult<RequestIdentity> {
    let identity = if let Some(raw_key) = api_key(headers) {
        let key = services.api_keys.validate_key(raw_key).await?;
        RequestIdentity::from_api_key(&key)
    } else if let Some(token) = bearer_token(headers) {
        identity_from_bearer(services, token).await?
    } else {
        return Err(AuthError::unauthorized("missing credentials"));
    };

    if let Some(token_id) = identity.token_id.as_deref() {
        if services.revocations.is_revoked(token_id).await? {
            tracing::debug!(subject = %identity.subject, token_id, "Revoked token presented");
            return Err(AuthError::TokenRevoked);
        }
        if let Some(expires_at) = identity
            .expires_at
            .and_then(|exp| OffsetDateTime::from_unix_timestamp(exp).ok())
        {
            services
                .revocations
                .record_token(&identity.subject, token_id, expires_at)
                .await?;
        }
    }

    Ok(identity)
}

async fn identity_from_bearer(services: &AuthServices, token: &str) -> AuthResult<RequestIdentity> {
    let header = jsonwebtoken::decode_header(token)
        .map_err(|e| AuthError::invalid_token(format!("malformed token: {e}")))?;

    if header.alg == Algorithm::HS256 {
        let claims = services.authority.jwt().decode(token).map_err(|e| {
            tracing::debug!(error = %e, "Local token rejected");
            match e {
                JwtError::Expired => AuthError::TokenExpired,
                other => AuthError::invalid_token(other.to_string()),
            }
        })?;
        return Ok(RequestIdentity::from_access_token(&claims));
    }

    match &services.external {
        Some(validator) => validator.validate(token, &services.shutdown_token()).await,
        None => Err(AuthError::invalid_token(format!(
            "unsupported algorithm {:?}",
            header.alg
        ))),
    }
}

// =============================================================================
// Extractors
// =============================================================================

/// The authenticated caller.
///
/// Uses the identity the enforcement middleware stored in the request
/// extensions when present, otherwise authenticates the request itself.
pub struct Identity(pub RequestIdentity);

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
    AuthServices: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(identity) = parts.extensions.get::<RequestIdentity>() {
            return Ok(Self(identity.clone()));
        }
        let services = AuthServices::from_ref(state);
        let identity = authenticate(&services, &parts.headers).await?;
        parts.extensions.insert(identity.clone());
        Ok(Self(identity))
    }
}

/// An authenticated caller holding the admin role.
pub struct AdminAuth(pub RequestIdentity);

impl<S> FromRequestParts<S> for AdminAuth
where
    S: Send + Sync,
    AuthServices: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Identity(identity) = Identity::from_request_parts(parts, state).await?;
        if !identity.is_admin() {
            tracing::debug!(subject = %identity.subject, "Admin endpoint denied");
            return Err(AuthError::forbidden("admin role required"));
        }
        Ok(Self(identity))
    }
}
