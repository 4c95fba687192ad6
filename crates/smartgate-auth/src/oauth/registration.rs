//! Dynamic client registration (RFC 7591 subset).

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::jwk::JwkSet;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::AuthError;
use crate::smart::split_scopes;
use crate::types::{Client, ClientKind, hash_secret};

pub const AUTH_METHOD_NONE: &str = "none";
pub const AUTH_METHOD_SECRET_BASIC: &str = "client_secret_basic";
pub const AUTH_METHOD_SECRET_POST: &str = "client_secret_post";
pub const AUTH_METHOD_PRIVATE_KEY_JWT: &str = "private_key_jwt";

/// Registration request body.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ClientRegistrationRequest {
    #[serde(default)]
    pub client_name: Option<String>,

    #[serde(default)]
    pub redirect_uris: Vec<String>,

    /// `none`, `client_secret_basic`, `client_secret_post` or
    /// `private_key_jwt`. Defaults to `none`.
    #[serde(default)]
    pub token_endpoint_auth_method: Option<String>,

    /// Space separated scopes the client may request.
    #[serde(default)]
    pub scope: Option<String>,

    /// Public keys for `private_key_jwt`.
    #[serde(default)]
    pub jwks: Option<JwkSet>,
}

/// Registration response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRegistrationResponse {
    pub client_id: String,

    /// Returned once, for confidential clients only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    pub client_id_issued_at: i64,

    pub client_name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub redirect_uris: Vec<String>,

    pub grant_types: Vec<String>,

    pub token_endpoint_auth_method: String,

    pub scope: String,
}

impl ClientRegistrationRequest {
    /// Builds a client record with a fresh id and, for confidential
    /// clients, a fresh secret.
    ///
    /// Dynamically registered clients never receive roles.
    ///
    /// # Errors
    ///
    /// Returns `InvalidClientMetadata` for unsupported auth methods, missing
    /// scope, or keys/redirects inconsistent with the auth method.
    pub fn into_client(self) -> Result<(Client, ClientRegistrationResponse), AuthError> {
        let method = self
            .token_endpoint_auth_method
            .clone()
            .unwrap_or_else(|| AUTH_METHOD_NONE.to_string());
        let scopes = self.scope.as_deref().map(split_scopes).unwrap_or_default();
        if scopes.is_empty() {
            return Err(AuthError::invalid_client_metadata("scope is required"));
        }

        let client_id = uuid::Uuid::new_v4().to_string();
        let name = self.client_name.unwrap_or_else(|| client_id.clone());

        let (kind, secret, grant_types) = match method.as_str() {
            AUTH_METHOD_NONE => {
                let kind = ClientKind::Interactive {
                    redirect_uris: self.redirect_uris.clone(),
                    confidential: false,
                    client_secret_hash: None,
                };
                (kind, None, interactive_grants())
            }
            AUTH_METHOD_SECRET_BASIC | AUTH_METHOD_SECRET_POST => {
                let secret = generate_client_secret();
                let kind = ClientKind::Interactive {
                    redirect_uris: self.redirect_uris.clone(),
                    confidential: true,
                    client_secret_hash: Some(hash_secret(&secret)),
                };
                (kind, Some(secret), interactive_grants())
            }
            AUTH_METHOD_PRIVATE_KEY_JWT => {
                let jwks = self.jwks.ok_or_else(|| {
                    AuthError::invalid_client_metadata("private_key_jwt requires jwks")
                })?;
                let kind = ClientKind::BackendService { jwks };
                (kind, None, vec!["client_credentials".to_string()])
            }
            other => {
                return Err(AuthError::invalid_client_metadata(format!(
                    "unsupported token_endpoint_auth_method: {other}"
                )));
            }
        };

        let created_at = OffsetDateTime::now_utc();
        let client = Client {
            client_id: client_id.clone(),
            name: name.clone(),
            scopes: scopes.clone(),
            roles: Vec::new(),
            active: true,
            access_token_lifetime: None,
            kind,
            created_at,
        };
        client
            .validate()
            .map_err(|e| AuthError::invalid_client_metadata(e.to_string()))?;

        let response = ClientRegistrationResponse {
            client_id,
            client_secret: secret,
            client_id_issued_at: created_at.unix_timestamp(),
            client_name: name,
            redirect_uris: if client.is_interactive() {
                self.redirect_uris
            } else {
                Vec::new()
            },
            grant_types,
            token_endpoint_auth_method: method,
            scope: scopes.join(" "),
        };
        Ok((client, response))
    }
}

fn interactive_grants() -> Vec<String> {
    vec!["authorization_code".to_string(), "refresh_token".to_string()]
}

/// 32 random bytes, base64url encoded.
#[must_use]
pub fn generate_client_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
