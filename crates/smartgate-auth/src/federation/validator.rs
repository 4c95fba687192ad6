//! Validation of tokens issued by an external identity provider.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::AuthResult;
use crate::config::FederationConfig;
use crate::error::AuthError;
use crate::federation::jwks::{KeyCache, KeyCacheError};
use crate::identity::{IdentitySource, RequestIdentity};
use crate::smart::split_scopes;

/// Signature algorithms accepted from external providers.
pub const EXTERNAL_ALGORITHMS: [Algorithm; 4] = [
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::ES256,
    Algorithm::ES384,
];

const DEFAULT_LEEWAY: Duration = Duration::from_secs(30);

/// `scp` is a space separated string at some providers and a list at others.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ScopeClaim {
    Joined(String),
    List(Vec<String>),
}

impl ScopeClaim {
    fn into_scopes(self) -> Vec<String> {
        match self {
            Self::Joined(s) => split_scopes(&s),
            Self::List(list) => list,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ExternalClaims {
    sub: String,
    exp: i64,
    #[serde(default)]
    jti: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    scp: Option<ScopeClaim>,
    #[serde(default)]
    roles: Vec<String>,
    #[serde(default, alias = "tenant_id")]
    tenant: Option<String>,
    #[serde(default)]
    patient: Option<String>,
    #[serde(default, alias = "azp")]
    client_id: Option<String>,
    #[serde(default, rename = "fhirUser")]
    fhir_user: Option<String>,
}

/// Verifies externally issued JWTs against the provider's published keys.
#[derive(Clone)]
pub struct ExternalTokenValidator {
    keys: Arc<KeyCache>,
    issuer: Option<String>,
    audience: Option<String>,
    leeway: Duration,
}

impl ExternalTokenValidator {
    #[must_use]
    pub fn new(keys: Arc<KeyCache>, issuer: Option<String>, audience: Option<String>) -> Self {
        Self {
            keys,
            issuer,
            audience,
            leeway: DEFAULT_LEEWAY,
        }
    }

    /// Builds a validator when a provider is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cache cannot be built.
    pub fn from_config(config: &FederationConfig) -> Result<Option<Self>, KeyCacheError> {
        Ok(KeyCache::from_config(config)?.map(|keys| {
            Self::new(Arc::new(keys), config.issuer.clone(), config.audience.clone())
        }))
    }

    #[must_use]
    pub fn key_cache(&self) -> &Arc<KeyCache> {
        &self.keys
    }

    /// Verifies `token` and maps its claims to a request identity.
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` for unsupported algorithms, missing `kid`,
    /// unknown keys, bad signatures, wrong issuer or audience, and
    /// `TokenExpired` for expired tokens. Key set fetch failures surface as
    /// `KeySource`; a fired `cancel` token surfaces as `InvalidToken`.
    pub async fn validate(&self, token: &str, cancel: &CancellationToken) -> AuthResult<RequestIdentity> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| AuthError::invalid_token(format!("malformed token header: {e}")))?;
        if !EXTERNAL_ALGORITHMS.contains(&header.alg) {
            return Err(AuthError::invalid_token(format!(
                "unsupported algorithm {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .as_deref()
            .ok_or_else(|| AuthError::invalid_token("token has no kid"))?;

        let jwk = self.keys.get_key_cancellable(kid, cancel).await?;
        let key = DecodingKey::from_jwk(&jwk)
            .map_err(|e| AuthError::invalid_token(format!("unusable key {kid}: {e}")))?;

        let mut validation = Validation::new(header.alg);
        validation.leeway = self.leeway.as_secs();
        validation.set_required_spec_claims(&["exp", "sub"]);
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        let data = jsonwebtoken::decode::<ExternalClaims>(token, &key, &validation).map_err(|e| {
            tracing::debug!(kid = %kid, error = %e, "External token rejected");
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::invalid_token(e.to_string()),
            }
        })?;

        Ok(identity_from_claims(data.claims))
    }
}

fn identity_from_claims(claims: ExternalClaims) -> RequestIdentity {
    let mut scopes = claims.scope.as_deref().map(split_scopes).unwrap_or_default();
    if let Some(scp) = claims.scp {
        for scope in scp.into_scopes() {
            if !scopes.contains(&scope) {
                scopes.push(scope);
            }
        }
    }

    RequestIdentity {
        subject: claims.sub,
        client_id: claims.client_id,
        roles: claims.roles,
        scopes,
        tenant_id: claims.tenant,
        patient: claims.patient,
        encounter: None,
        fhir_user: claims.fhir_user,
        token_id: claims.jti,
        expires_at: Some(claims.exp),
        source: IdentitySource::ExternalToken,
    }
}
