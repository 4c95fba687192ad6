//! OAuth client domain types.

use jsonwebtoken::jwk::JwkSet;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use time::OffsetDateTime;

use crate::smart::scopes::{Scope, SmartScope};

/// A registered OAuth client.
///
/// Interactive clients use the authorization code flow; backend-service
/// clients authenticate with signed JWT assertions against their registered
/// key set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    /// Globally unique client identifier.
    pub client_id: String,

    /// Human readable name.
    pub name: String,

    /// Scopes this client may be granted.
    #[serde(default)]
    pub scopes: Vec<String>,

    /// Roles copied into every token issued to this client.
    #[serde(default)]
    pub roles: Vec<String>,

    /// Inactive clients cannot authorize or authenticate.
    #[serde(default = "default_true")]
    pub active: bool,

    /// Access token lifetime override in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token_lifetime: Option<i64>,

    #[serde(flatten)]
    pub kind: ClientKind,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

fn default_true() -> bool {
    true
}

/// Client variant specific data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "client_type", rename_all = "snake_case")]
pub enum ClientKind {
    /// Browser or native app using the authorization code flow.
    Interactive {
        redirect_uris: Vec<String>,
        confidential: bool,
        /// Hex SHA-256 of the client secret. Never serialized.
        #[serde(skip_serializing, default)]
        client_secret_hash: Option<String>,
    },
    /// Machine client using `private_key_jwt`.
    BackendService { jwks: JwkSet },
}

/// Client validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientValidationError {
    #[error("client_id must not be empty")]
    EmptyClientId,

    #[error("interactive clients require at least one redirect URI")]
    NoRedirectUris,

    #[error("invalid redirect URI: {0}")]
    InvalidRedirectUri(String),

    #[error("confidential clients require a client secret")]
    MissingSecret,

    #[error("public clients must not carry a client secret")]
    UnexpectedSecret,

    #[error("backend service clients require at least one registered key")]
    NoKeys,

    #[error("invalid scope: {0}")]
    InvalidScope(String),
}

impl Client {
    /// Validates structural invariants.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), ClientValidationError> {
        if self.client_id.trim().is_empty() {
            return Err(ClientValidationError::EmptyClientId);
        }

        for scope in &self.scopes {
            Scope::parse(scope).map_err(|_| ClientValidationError::InvalidScope(scope.clone()))?;
        }

        match &self.kind {
            ClientKind::Interactive {
                redirect_uris,
                confidential,
                client_secret_hash,
            } => {
                if redirect_uris.is_empty() {
                    return Err(ClientValidationError::NoRedirectUris);
                }
                for uri in redirect_uris {
                    let parsed = url::Url::parse(uri)
                        .map_err(|_| ClientValidationError::InvalidRedirectUri(uri.clone()))?;
                    if parsed.fragment().is_some() {
                        return Err(ClientValidationError::InvalidRedirectUri(uri.clone()));
                    }
                }
                let has_secret = client_secret_hash.as_deref().is_some_and(|h| !h.is_empty());
                match (*confidential, has_secret) {
                    (true, false) => return Err(ClientValidationError::MissingSecret),
                    (false, true) => return Err(ClientValidationError::UnexpectedSecret),
                    _ => {}
                }
            }
            ClientKind::BackendService { jwks } => {
                if jwks.keys.is_empty() {
                    return Err(ClientValidationError::NoKeys);
                }
            }
        }

        Ok(())
    }

    /// Returns `true` for interactive clients.
    #[must_use]
    pub fn is_interactive(&self) -> bool {
        matches!(self.kind, ClientKind::Interactive { .. })
    }

    /// Returns `true` for backend-service clients.
    #[must_use]
    pub fn is_backend_service(&self) -> bool {
        matches!(self.kind, ClientKind::BackendService { .. })
    }

    /// Returns `true` for confidential interactive clients.
    #[must_use]
    pub fn is_confidential(&self) -> bool {
        matches!(
            self.kind,
            ClientKind::Interactive {
                confidential: true,
                ..
            }
        )
    }

    /// Exact-match redirect URI check.
    #[must_use]
    pub fn is_redirect_uri_allowed(&self, uri: &str) -> bool {
        match &self.kind {
            ClientKind::Interactive { redirect_uris, .. } => {
                redirect_uris.iter().any(|allowed| allowed == uri)
            }
            ClientKind::BackendService { .. } => false,
        }
    }

    /// Returns `true` if a requested scope falls within the client's
    /// registered scopes.
    ///
    /// Named scopes match by string; resource scopes also match when a
    /// registered wildcard scope of the same context covers them.
    #[must_use]
    pub fn is_scope_allowed(&self, requested: &str) -> bool {
        if self.scopes.iter().any(|s| s == requested) {
            return true;
        }
        let Ok(Scope::Resource(requested)) = Scope::parse(requested) else {
            return false;
        };
        self.scopes.iter().any(|allowed| {
            matches!(
                SmartScope::parse(allowed),
                Ok(allowed) if allowed.includes(&requested)
            )
        })
    }

    /// Constant-time comparison of a presented secret against the stored hash.
    #[must_use]
    pub fn verify_secret(&self, presented: &str) -> bool {
        let ClientKind::Interactive {
            client_secret_hash: Some(stored),
            ..
        } = &self.kind
        else {
            return false;
        };
        let presented = hash_secret(presented);
        presented.as_bytes().ct_eq(stored.as_bytes()).into()
    }
}

/// Hex encoded SHA-256 of a client secret.
#[must_use]
pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Client declared in configuration and registered at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientDefinition {
    pub client_id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Plaintext secret for confidential interactive clients.
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Registered keys; presence makes this a backend-service client.
    #[serde(default)]
    pub jwks: Option<JwkSet>,
    #[serde(default)]
    pub access_token_lifetime: Option<i64>,
}

impl ClientDefinition {
    /// Converts the definition into a client record.
    #[must_use]
    pub fn into_client(self) -> Client {
        let kind = match self.jwks {
            Some(jwks) => ClientKind::BackendService { jwks },
            None => ClientKind::Interactive {
                redirect_uris: self.redirect_uris,
                confidential: self.secret.is_some(),
                client_secret_hash: self.secret.as_deref().map(hash_secret),
            },
        };
        Client {
            name: self.name.unwrap_or_else(|| self.client_id.clone()),
            client_id: self.client_id,
            scopes: self.scopes,
            roles: self.roles,
            active: true,
            access_token_lifetime: self.access_token_lifetime,
            kind,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}
