//! Locally issued access tokens (HS256).
//!
//! Access tokens are self-contained and never persisted; validity is the
//! signature, the expiry and (in the enforcement layer) the revocation store.

use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};

use crate::config::{AuthConfig, MIN_SIGNING_SECRET_LEN};

/// Claims of a locally issued access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub iss: String,
    /// User reference for interactive grants, client id for backend services.
    pub sub: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    /// Space separated granted scopes.
    pub scope: String,
    pub client_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encounter: Option<String>,

    #[serde(rename = "fhirUser", default, skip_serializing_if = "Option::is_none")]
    pub fhir_user: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
}

impl AccessTokenClaims {
    /// Scopes as individual strings.
    #[must_use]
    pub fn scopes(&self) -> Vec<String> {
        crate::smart::split_scopes(&self.scope)
    }
}

/// Token encoding and decoding errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JwtError {
    #[error("token expired")]
    Expired,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid claims: {0}")]
    InvalidClaims(String),

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("failed to sign token: {0}")]
    Encoding(String),

    #[error("signing secret must be at least {MIN_SIGNING_SECRET_LEN} bytes")]
    WeakSecret,
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidIssuer
            | ErrorKind::InvalidAudience
            | ErrorKind::InvalidSubject
            | ErrorKind::ImmatureSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::MissingRequiredClaim(_) => Self::InvalidClaims(err.to_string()),
            _ => Self::Malformed(err.to_string()),
        }
    }
}

/// Signs and verifies HS256 access tokens with one shared secret.
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
}

impl std::fmt::Debug for JwtService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtService")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish_non_exhaustive()
    }
}

impl JwtService {
    /// Creates a service from a raw secret.
    ///
    /// # Errors
    ///
    /// Returns `WeakSecret` if the secret is shorter than 32 bytes.
    pub fn new(
        secret: &[u8],
        issuer: impl Into<String>,
        audience: impl Into<String>,
    ) -> Result<Self, JwtError> {
        if secret.len() < MIN_SIGNING_SECRET_LEN {
            return Err(JwtError::WeakSecret);
        }
        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: issuer.into(),
            audience: audience.into(),
        })
    }

    /// Creates a service from configuration, generating an ephemeral secret
    /// when none is configured.
    ///
    /// # Errors
    ///
    /// Returns `WeakSecret` if the configured secret is too short.
    pub fn from_config(config: &AuthConfig) -> Result<Self, JwtError> {
        match &config.signing.secret {
            Some(secret) => Self::new(secret.as_bytes(), &config.issuer, &config.fhir_base_url),
            None => {
                tracing::warn!(
                    "No signing secret configured; generated an ephemeral key, tokens will not survive a restart"
                );
                let mut secret = [0u8; 48];
                rand::Rng::fill(&mut rand::thread_rng(), &mut secret[..]);
                Self::new(&secret, &config.issuer, &config.fhir_base_url)
            }
        }
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Signs claims into a compact JWT with header `{"alg":"HS256","typ":"JWT"}`.
    ///
    /// # Errors
    ///
    /// Returns `Encoding` if signing fails.
    pub fn encode(&self, claims: &AccessTokenClaims) -> Result<String, JwtError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| JwtError::Encoding(e.to_string()))
    }

    /// Verifies signature, expiry, issuer and audience.
    ///
    /// # Errors
    ///
    /// Returns `JwtError` describing the first failed check.
    pub fn decode(&self, token: &str) -> Result<AccessTokenClaims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);

        let data = decode::<AccessTokenClaims>(token, &self.decoding_key, &validation)?;
        Ok(data.claims)
    }
}

/// Generates a unique token id.
#[must_use]
pub fn new_jti() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
    use time::OffsetDateTime;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn service() -> JwtService {
        JwtService::new(SECRET, "https://auth.example.com", "https://fhir.example.com").unwrap()
    }

    fn claims(exp_offset: i64) -> AccessTokenClaims {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        AccessTokenClaims {
            iss: "https://auth.example.com".to_string(),
            sub: "Practitioner/1".to_string(),
            aud: "https://fhir.example.com".to_string(),
            exp: now + exp_offset,
            iat: now,
            jti: new_jti(),
            scope: "launch patient/*.read".to_string(),
            client_id: "growth-chart".to_string(),
            patient: Some("123".to_string()),
            encounter: None,
            fhir_user: Some("Practitioner/1".to_string()),
            roles: vec!["practitioner".to_string()],
        }
    }

    #[test]
    fn test_ephemeral_secret_when_unconfigured() {
        let mut config = AuthConfig::default();
        config.signing.secret = None;
        let first = JwtService::from_config(&config).unwrap();
        let second = JwtService::from_config(&config).unwrap();

        let mut original = claims(300);
        original.iss = first.issuer().to_string();
        original.aud = first.audience().to_string();
        let token = first.encode(&original).unwrap();
        assert_eq!(first.decode(&token).unwrap(), original);

        // a fresh secret per instance
        assert!(second.decode(&token).is_err());
    }

    #[test]
    fn test_sign_and_verify() {
        let svc = service();
        let original = claims(300);
        let token = svc.encode(&original).unwrap();
        assert_eq!(token.split('.').count(), 3);

        let decoded = svc.decode(&token).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(decoded.scopes(), vec!["launch", "patient/*.read"]);
    }

    #[test]
    fn test_header_is_hs256_jwt() {
        let token = service().encode(&claims(300)).unwrap();
        let header = token.split('.').next().unwrap();
        let header: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(header).unwrap()).unwrap();
        assert_eq!(header["alg"], "HS256");
        assert_eq!(header["typ"], "JWT");
    }

    #[test]
    fn test_fhir_user_claim_name() {
        let token = service().encode(&claims(300)).unwrap();
        let payload = token.split('.').nth(1).unwrap();
        let payload: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).unwrap()).unwrap();
        assert_eq!(payload["fhirUser"], "Practitioner/1");
        assert!(payload.get("encounter").is_none());
    }

    #[test]
    fn test_expired_token_rejected() {
        let svc = service();
        let token = svc.encode(&claims(-10)).unwrap();
        assert_eq!(svc.decode(&token), Err(JwtError::Expired));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = service().encode(&claims(300)).unwrap();
        let other = JwtService::new(
            b"ffffffffffffffffffffffffffffffff",
            "https://auth.example.com",
            "https://fhir.example.com",
        )
        .unwrap();
        assert_eq!(other.decode(&token), Err(JwtError::InvalidSignature));
    }

    #[test]
    fn test_wrong_audience_rejected() {
        let token = service().encode(&claims(300)).unwrap();
        let other = JwtService::new(SECRET, "https://auth.example.com", "https://other.example.com")
            .unwrap();
        assert!(matches!(other.decode(&token), Err(JwtError::InvalidClaims(_))));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(service().decode("not-a-token"), Err(JwtError::Malformed(_))));
    }

    #[test]
    fn test_weak_secret_rejected() {
        assert!(matches!(
            JwtService::new(b"short", "iss", "aud"),
            Err(JwtError::WeakSecret)
        ));
    }
}
