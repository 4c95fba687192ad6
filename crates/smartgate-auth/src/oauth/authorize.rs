//! Authorization endpoint types.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AuthError;

/// Query parameters of `GET /auth/authorize`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthorizationRequest {
    pub response_type: String,
    pub client_id: String,
    pub redirect_uri: String,

    /// Space separated requested scopes.
    #[serde(default)]
    pub scope: String,

    /// Opaque value echoed back to the client.
    #[serde(default)]
    pub state: Option<String>,

    #[serde(default)]
    pub code_challenge: Option<String>,

    #[serde(default)]
    pub code_challenge_method: Option<String>,

    /// EHR launch id from `/auth/launch`.
    #[serde(default)]
    pub launch: Option<String>,

    /// FHIR server the app intends to access.
    #[serde(default)]
    pub aud: Option<String>,
}

/// Successful authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizationResponse {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Verified redirect target.
    #[serde(skip)]
    pub redirect_uri: String,
}

impl AuthorizationResponse {
    /// Redirect URL carrying `code` and `state`.
    ///
    /// # Errors
    ///
    /// Returns an error if the redirect URI is not a valid URL.
    pub fn to_redirect_url(&self) -> Result<String, url::ParseError> {
        let mut url = Url::parse(&self.redirect_uri)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("code", &self.code);
            if let Some(state) = &self.state {
                pairs.append_pair("state", state);
            }
        }
        Ok(url.into())
    }
}

/// A failed authorization.
///
/// Errors found before the client and redirect URI are verified must never
/// be sent to the redirect URI; they are rendered directly instead.
#[derive(Debug)]
pub enum AuthorizeError {
    /// Render to the user agent.
    Direct(AuthError),
    /// Report to the client through its verified redirect URI.
    Redirect {
        redirect_uri: String,
        state: Option<String>,
        error: AuthError,
    },
}

impl AuthorizeError {
    /// The underlying error.
    #[must_use]
    pub fn error(&self) -> &AuthError {
        match self {
            Self::Direct(error) | Self::Redirect { error, .. } => error,
        }
    }

    #[must_use]
    pub fn into_error(self) -> AuthError {
        match self {
            Self::Direct(error) | Self::Redirect { error, .. } => error,
        }
    }

    /// Redirect URL carrying `error`, `error_description` and `state`, or
    /// `None` for direct errors.
    #[must_use]
    pub fn to_redirect_url(&self) -> Option<String> {
        let Self::Redirect {
            redirect_uri,
            state,
            error,
        } = self
        else {
            return None;
        };
        let mut url = Url::parse(redirect_uri).ok()?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("error", error.oauth_error_code());
            pairs.append_pair("error_description", &error.to_string());
            if let Some(state) = state {
                pairs.append_pair("state", state);
            }
        }
        Some(url.into())
    }
}

impl From<AuthError> for AuthorizeError {
    fn from(error: AuthError) -> Self {
        Self::Direct(error)
    }
}
