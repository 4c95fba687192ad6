//! Token endpoint types.
//!
//! Supported grants:
//!
//! - `authorization_code` (with PKCE)
//! - `refresh_token`
//! - `client_credentials` with an RFC 7523 JWT client assertion

use serde::{Deserialize, Serialize};

use crate::error::AuthError;

pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";
pub const GRANT_CLIENT_CREDENTIALS: &str = "client_credentials";

/// `client_assertion_type` for JWT bearer client authentication.
pub const CLIENT_ASSERTION_TYPE_JWT_BEARER: &str =
    "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Form body of `POST /auth/token`. Which fields are required depends on
/// `grant_type`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TokenRequest {
    pub grant_type: String,

    #[serde(default)]
    pub code: Option<String>,

    #[serde(default)]
    pub redirect_uri: Option<String>,

    #[serde(default)]
    pub code_verifier: Option<String>,

    #[serde(default)]
    pub client_id: Option<String>,

    /// `client_secret_post` authentication.
    #[serde(default)]
    pub client_secret: Option<String>,

    #[serde(default)]
    pub client_assertion_type: Option<String>,

    #[serde(default)]
    pub client_assertion: Option<String>,

    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Requested scope; for refresh, a subset of the original grant.
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenRequest {
    /// Returns a required parameter or an `invalid_request` error.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` if the parameter is absent or empty.
    pub fn require<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, AuthError> {
        value
            .as_deref()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AuthError::invalid_request(format!("missing parameter: {name}")))
    }
}

/// Client id and secret presented at the token endpoint, from either HTTP
/// Basic auth or the form body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: Option<String>,
}

impl ClientCredentials {
    #[must_use]
    pub fn public(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
        }
    }

    #[must_use]
    pub fn confidential(client_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: Some(secret.into()),
        }
    }
}

/// Successful token response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,

    /// Always `Bearer`.
    pub token_type: String,

    /// Access token lifetime in seconds.
    pub expires_in: u64,

    pub scope: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encounter: Option<String>,
}

impl TokenResponse {
    #[must_use]
    pub fn new(access_token: String, expires_in: u64, scope: String) -> Self {
        Self {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in,
            scope,
            refresh_token: None,
            patient: None,
            encounter: None,
        }
    }

    #[must_use]
    pub fn with_refresh_token(mut self, token: String) -> Self {
        self.refresh_token = Some(token);
        self
    }

    #[must_use]
    pub fn with_context(mut self, patient: Option<String>, encounter: Option<String>) -> Self {
        self.patient = patient;
        self.encounter = encounter;
        self
    }
}

/// RFC 6749 section 5.2 error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl TokenErrorResponse {
    /// HTTP status for this error: 401 for `invalid_client`, 500 for server
    /// errors, 400 otherwise.
    #[must_use]
    pub fn status_for(error: &AuthError) -> u16 {
        match error.oauth_error_code() {
            "invalid_client" => 401,
            "server_error" => 500,
            _ => 400,
        }
    }
}

impl From<&AuthError> for TokenErrorResponse {
    fn from(error: &AuthError) -> Self {
        let description = if error.is_server_error() {
            "internal error".to_string()
        } else {
            error.to_string()
        };
        Self {
            error: error.oauth_error_code().to_string(),
            error_description: Some(description),
        }
    }
}
