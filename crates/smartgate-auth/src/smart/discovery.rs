//! SMART App Launch discovery document (`/.well-known/smart-configuration`).

use serde::{Deserialize, Serialize};

use crate::config::AuthConfig;

/// SMART configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartConfiguration {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub introspection_endpoint: String,
    pub revocation_endpoint: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_endpoint: Option<String>,

    /// EHR launch context creation endpoint.
    pub launch_endpoint: String,

    pub grant_types_supported: Vec<String>,
    pub response_types_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
    pub token_endpoint_auth_signing_alg_values_supported: Vec<String>,
    pub scopes_supported: Vec<String>,
    pub capabilities: Vec<String>,
}

impl SmartConfiguration {
    /// Builds the document from configuration.
    #[must_use]
    pub fn from_config(config: &AuthConfig) -> Self {
        let registration_endpoint = config
            .oauth
            .dynamic_registration
            .then(|| config.endpoint("/auth/register"));

        Self {
            issuer: config.issuer.clone(),
            authorization_endpoint: config.endpoint("/auth/authorize"),
            token_endpoint: config.token_endpoint(),
            introspection_endpoint: config.endpoint("/auth/introspect"),
            revocation_endpoint: config.endpoint("/auth/revoke"),
            registration_endpoint,
            launch_endpoint: config.endpoint("/auth/launch"),
            grant_types_supported: config.oauth.grant_types.clone(),
            response_types_supported: vec!["code".to_string()],
            code_challenge_methods_supported: vec!["S256".to_string()],
            token_endpoint_auth_methods_supported: vec![
                "client_secret_basic".to_string(),
                "client_secret_post".to_string(),
                "private_key_jwt".to_string(),
            ],
            token_endpoint_auth_signing_alg_values_supported: vec!["RS384".to_string()],
            scopes_supported: config.smart.scopes_supported.clone(),
            capabilities: config.smart.capabilities.clone(),
        }
    }
}
