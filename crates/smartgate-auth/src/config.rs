//! Authentication and authorization configuration.
//!
//! All sections use `#[serde(default)]` so a partial TOML file (or none at
//! all) yields a working development setup. Durations are written in
//! humantime format (`"5m"`, `"24h"`).

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::policy::{AbacPolicy, ConsentDirective, RbacRule};

/// Root authentication and authorization configuration.
///
/// # Example (TOML)
///
/// ```toml
/// [auth]
/// issuer = "https://fhir.example.com"
/// fhir_base_url = "https://fhir.example.com/fhir"
///
/// [auth.oauth]
/// access_token_lifetime = "1h"
/// refresh_token_lifetime = "90d"
///
/// [auth.signing]
/// secret = "at-least-thirty-two-bytes-of-secret-material"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Issuer URL placed in the `iss` claim and returned from `/launch`.
    pub issuer: String,

    /// FHIR base URL, used as the audience of locally issued tokens.
    pub fhir_base_url: String,

    /// OAuth 2.0 configuration.
    pub oauth: OAuthConfig,

    /// SMART on FHIR configuration.
    pub smart: SmartConfig,

    /// Local token signing configuration.
    pub signing: SigningConfig,

    /// Backend services (JWT bearer client assertion) configuration.
    pub backend: BackendConfig,

    /// External identity provider token validation.
    pub federation: FederationConfig,

    /// API key configuration.
    pub api_keys: ApiKeyConfig,

    /// Idempotent replay cache configuration.
    pub idempotency: IdempotencyConfig,

    /// RBAC and ABAC rules.
    pub policy: PolicyConfig,

    /// Consent enforcement configuration.
    pub consent: ConsentConfig,

    /// Background maintenance configuration.
    pub maintenance: MaintenanceConfig,

    /// Credentials created at startup.
    pub bootstrap: BootstrapConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: "http://localhost:8080".to_string(),
            fhir_base_url: "http://localhost:8080/fhir".to_string(),
            oauth: OAuthConfig::default(),
            smart: SmartConfig::default(),
            signing: SigningConfig::default(),
            backend: BackendConfig::default(),
            federation: FederationConfig::default(),
            api_keys: ApiKeyConfig::default(),
            idempotency: IdempotencyConfig::default(),
            policy: PolicyConfig::default(),
            consent: ConsentConfig::default(),
            maintenance: MaintenanceConfig::default(),
            bootstrap: BootstrapConfig::default(),
        }
    }
}

impl AuthConfig {
    /// Token endpoint URL, the required audience of client assertions.
    #[must_use]
    pub fn token_endpoint(&self) -> String {
        format!("{}/auth/token", self.issuer.trim_end_matches('/'))
    }

    /// Builds an endpoint URL relative to the issuer.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.issuer.trim_end_matches('/'), path)
    }
}

/// OAuth 2.0 configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// Authorization code lifetime.
    #[serde(with = "humantime_serde")]
    pub authorization_code_lifetime: Duration,

    /// Default access token lifetime for interactive clients.
    #[serde(with = "humantime_serde")]
    pub access_token_lifetime: Duration,

    /// Refresh token lifetime.
    #[serde(with = "humantime_serde")]
    pub refresh_token_lifetime: Duration,

    /// Grant types accepted by the token endpoint.
    pub grant_types: Vec<String>,

    /// Whether `POST /auth/register` is enabled.
    pub dynamic_registration: bool,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            authorization_code_lifetime: Duration::from_secs(300),
            access_token_lifetime: Duration::from_secs(3600),
            refresh_token_lifetime: Duration::from_secs(90 * 24 * 3600),
            grant_types: vec![
                "authorization_code".to_string(),
                "refresh_token".to_string(),
                "client_credentials".to_string(),
            ],
            dynamic_registration: true,
        }
    }
}

/// SMART on FHIR configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SmartConfig {
    /// Lifetime of EHR launch contexts.
    #[serde(with = "humantime_serde")]
    pub launch_context_lifetime: Duration,

    /// Scopes advertised in the discovery document.
    pub scopes_supported: Vec<String>,

    /// SMART capabilities advertised in the discovery document.
    pub capabilities: Vec<String>,
}

impl Default for SmartConfig {
    fn default() -> Self {
        Self {
            launch_context_lifetime: Duration::from_secs(600),
            scopes_supported: [
                "openid",
                "fhirUser",
                "launch",
                "launch/patient",
                "launch/encounter",
                "offline_access",
                "online_access",
                "patient/*.read",
                "patient/*.write",
                "user/*.read",
                "user/*.write",
                "system/*.read",
                "system/*.write",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
            capabilities: [
                "launch-ehr",
                "launch-standalone",
                "client-public",
                "client-confidential-symmetric",
                "client-confidential-asymmetric",
                "context-ehr-patient",
                "context-ehr-encounter",
                "permission-offline",
                "permission-patient",
                "permission-user",
                "permission-v1",
                "permission-v2",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
        }
    }
}

/// Local token signing configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Shared HS256 secret. When unset a random secret is generated at
    /// startup and tokens do not survive a restart.
    pub secret: Option<String>,
}

/// Minimum accepted length of the HS256 secret, in bytes.
pub const MIN_SIGNING_SECRET_LEN: usize = 32;

/// Upper bound for every configured lifetime, TTL and interval.
pub const MAX_CONFIGURED_DURATION: Duration = Duration::from_secs(365 * 86_400);

/// Backend services configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Maximum distance of an assertion's `exp` into the future.
    #[serde(with = "humantime_serde")]
    pub max_assertion_lifetime: Duration,

    /// Clock skew tolerance applied to assertion expiry checks.
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,

    /// Access token lifetime for clients that do not configure their own.
    #[serde(with = "humantime_serde")]
    pub access_token_lifetime: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            max_assertion_lifetime: Duration::from_secs(300),
            clock_skew: Duration::from_secs(30),
            access_token_lifetime: Duration::from_secs(300),
        }
    }
}

/// External identity provider configuration.
///
/// Tokens that are not locally signed are verified against the key set at
/// `jwks_uri`. Leaving `jwks_uri` unset disables external tokens.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FederationConfig {
    /// Remote JWKS endpoint.
    pub jwks_uri: Option<String>,

    /// Required `iss` of external tokens.
    pub issuer: Option<String>,

    /// Required `aud` of external tokens.
    pub audience: Option<String>,

    /// How long a fetched key set is served before refetching.
    #[serde(with = "humantime_serde")]
    pub jwks_cache_ttl: Duration,

    /// HTTP timeout for key set fetches.
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,

    /// Largest key set body accepted, in bytes.
    pub max_response_bytes: usize,

    /// Permit `http://` key set URIs. Only for local testing.
    pub allow_insecure_http: bool,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            jwks_uri: None,
            issuer: None,
            audience: None,
            jwks_cache_ttl: Duration::from_secs(3600),
            fetch_timeout: Duration::from_secs(10),
            max_response_bytes: 1024 * 1024,
            allow_insecure_http: false,
        }
    }
}

/// API key configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiKeyConfig {
    /// Prefix prepended to generated raw keys.
    pub prefix: String,
}

impl Default for ApiKeyConfig {
    fn default() -> Self {
        Self {
            prefix: "sgk".to_string(),
        }
    }
}

/// Idempotency configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    /// How long a cached response is replayable.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Largest response body that is cached.
    pub max_body_bytes: usize,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 3600),
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// RBAC rules and ABAC policies.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Endpoint role requirements. Endpoints without a rule carry no role
    /// requirement.
    pub rbac: Vec<RbacRule>,

    /// Per-resource-type attribute policies. Resource types without a policy
    /// are denied.
    pub abac: Vec<AbacPolicy>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        let clinical_roles = vec![
            "practitioner".to_string(),
            "patient".to_string(),
            "system".to_string(),
        ];
        let abac = [
            "Patient",
            "Observation",
            "Condition",
            "Encounter",
            "MedicationRequest",
            "AllergyIntolerance",
        ]
        .iter()
        .map(|resource_type| AbacPolicy {
            resource_type: (*resource_type).to_string(),
            allowed_roles: clinical_roles.clone(),
            consent_required: false,
            care_team_required: false,
        })
        .collect();

        Self {
            rbac: Vec::new(),
            abac,
        }
    }
}

/// Consent enforcement configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConsentConfig {
    /// Upper bound on a consent lookup. Lookups that exceed it deny.
    #[serde(with = "humantime_serde")]
    pub lookup_timeout: Duration,

    /// Directives loaded into the consent store at startup.
    pub directives: Vec<ConsentDirective>,
}

impl Default for ConsentConfig {
    fn default() -> Self {
        Self {
            lookup_timeout: Duration::from_secs(2),
            directives: Vec::new(),
        }
    }
}

/// Background maintenance configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Interval between sweeps of expired codes, contexts and tokens.
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Credentials created at startup.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Raw API key imported with the `admin` role.
    pub admin_api_key: Option<String>,

    /// Statically configured clients.
    pub clients: Vec<crate::types::ClientDefinition>,
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl AuthConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - the issuer or FHIR base URL is empty or not a URL
    /// - the signing secret is shorter than 32 bytes
    /// - a lifetime or interval is zero or longer than a year
    /// - an unknown grant type is listed
    /// - the federation JWKS URI is not an https URL
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.is_empty() {
            return Err(ConfigError::Missing("issuer".to_string()));
        }
        url::Url::parse(&self.issuer)
            .map_err(|e| ConfigError::InvalidValue(format!("issuer is not a URL: {e}")))?;
        url::Url::parse(&self.fhir_base_url)
            .map_err(|e| ConfigError::InvalidValue(format!("fhir_base_url is not a URL: {e}")))?;

        if let Some(secret) = &self.signing.secret
            && secret.len() < MIN_SIGNING_SECRET_LEN
        {
            return Err(ConfigError::InvalidValue(format!(
                "signing.secret must be at least {MIN_SIGNING_SECRET_LEN} bytes"
            )));
        }

        for grant in &self.oauth.grant_types {
            match grant.as_str() {
                "authorization_code" | "client_credentials" | "refresh_token" => {}
                other => {
                    return Err(ConfigError::InvalidValue(format!(
                        "Invalid grant type: '{other}'. Must be authorization_code, client_credentials, or refresh_token"
                    )));
                }
            }
        }

        let durations = [
            ("oauth.authorization_code_lifetime", self.oauth.authorization_code_lifetime),
            ("oauth.access_token_lifetime", self.oauth.access_token_lifetime),
            ("oauth.refresh_token_lifetime", self.oauth.refresh_token_lifetime),
            ("smart.launch_context_lifetime", self.smart.launch_context_lifetime),
            ("backend.max_assertion_lifetime", self.backend.max_assertion_lifetime),
            ("backend.access_token_lifetime", self.backend.access_token_lifetime),
            ("federation.jwks_cache_ttl", self.federation.jwks_cache_ttl),
            ("idempotency.ttl", self.idempotency.ttl),
            ("consent.lookup_timeout", self.consent.lookup_timeout),
            ("maintenance.sweep_interval", self.maintenance.sweep_interval),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue(format!("{name} must be > 0")));
            }
        }
        let bounded = durations.into_iter().chain([
            ("backend.clock_skew", self.backend.clock_skew),
            ("federation.fetch_timeout", self.federation.fetch_timeout),
        ]);
        for (name, value) in bounded {
            if value > MAX_CONFIGURED_DURATION {
                return Err(ConfigError::InvalidValue(format!(
                    "{name} must not exceed {} days",
                    MAX_CONFIGURED_DURATION.as_secs() / 86_400
                )));
            }
        }

        if let Some(uri) = &self.federation.jwks_uri {
            let uri = url::Url::parse(uri).map_err(|e| {
                ConfigError::InvalidValue(format!("federation.jwks_uri is not a URL: {e}"))
            })?;
            match uri.scheme() {
                "https" => {}
                "http" if self.federation.allow_insecure_http => {}
                scheme => {
                    return Err(ConfigError::InvalidValue(format!(
                        "federation.jwks_uri must use https, got '{scheme}'"
                    )));
                }
            }
        }
        if self.federation.max_response_bytes == 0 {
            return Err(ConfigError::InvalidValue(
                "federation.max_response_bytes must be > 0".to_string(),
            ));
        }

        if self.api_keys.prefix.is_empty()
            || !self
                .api_keys
                .prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric())
        {
            return Err(ConfigError::InvalidValue(
                "api_keys.prefix must be non-empty and alphanumeric".to_string(),
            ));
        }

        Ok(())
    }
}
