//! The authenticated caller of a request.
//!
//! Built once by the authentication layer from whichever credential the
//! request carried, then passed explicitly to every policy, scope and
//! consent check.

use serde::{Deserialize, Serialize};

use crate::credentials::ApiKey;
use crate::policy::ADMIN_ROLE;
use crate::smart::{SmartScopes, split_scopes};
use crate::token::AccessTokenClaims;

/// Which credential produced an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    /// HS256 token issued by this server.
    LocalToken,
    /// Token issued by an external identity provider.
    ExternalToken,
    /// Opaque API key.
    ApiKey,
}

/// Identity and claims of the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestIdentity {
    /// User reference, client id, or API key id.
    pub subject: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default)]
    pub roles: Vec<String>,

    #[serde(default)]
    pub scopes: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    /// Patient in context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encounter: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fhir_user: Option<String>,

    /// `jti` of the presented token, used for revocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,

    /// Token expiry (Unix seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,

    pub source: IdentitySource,
}

impl RequestIdentity {
    /// Identity of a locally issued access token.
    #[must_use]
    pub fn from_access_token(claims: &AccessTokenClaims) -> Self {
        Self {
            subject: claims.sub.clone(),
            client_id: Some(claims.client_id.clone()),
            roles: claims.roles.clone(),
            scopes: split_scopes(&claims.scope),
            tenant_id: None,
            patient: claims.patient.clone(),
            encounter: claims.encounter.clone(),
            fhir_user: claims.fhir_user.clone(),
            token_id: Some(claims.jti.clone()),
            expires_at: Some(claims.exp),
            source: IdentitySource::LocalToken,
        }
    }

    /// Identity of a validated API key.
    #[must_use]
    pub fn from_api_key(key: &ApiKey) -> Self {
        Self {
            subject: format!("api-key/{}", key.id),
            client_id: key.client_id.clone(),
            roles: key.roles.clone(),
            scopes: key.scopes.clone(),
            tenant_id: key.tenant_id.clone(),
            patient: None,
            encounter: None,
            fhir_user: None,
            token_id: None,
            expires_at: key.expires_at.map(|t| t.unix_timestamp()),
            source: IdentitySource::ApiKey,
        }
    }

    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Returns `true` if the identity holds the global admin role.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.has_role(ADMIN_ROLE)
    }

    /// Parsed scopes; unrecognized entries are ignored.
    #[must_use]
    pub fn smart_scopes(&self) -> SmartScopes {
        SmartScopes::from_granted(&self.scopes)
    }

    /// Builder-style role override, mostly for tests and fixtures.
    #[must_use]
    pub fn with_roles(mut self, roles: &[&str]) -> Self {
        self.roles = roles.iter().map(ToString::to_string).collect();
        self
    }

    /// Builder-style scope override.
    #[must_use]
    pub fn with_scopes(mut self, scopes: &[&str]) -> Self {
        self.scopes = scopes.iter().map(ToString::to_string).collect();
        self
    }

    /// Builder-style patient context.
    #[must_use]
    pub fn with_patient(mut self, patient: impl Into<String>) -> Self {
        self.patient = Some(patient.into());
        self
    }

    /// Minimal identity with no roles or scopes.
    #[must_use]
    pub fn anonymous(subject: impl Into<String>, source: IdentitySource) -> Self {
        Self {
            subject: subject.into(),
            client_id: None,
            roles: Vec::new(),
            scopes: Vec::new(),
            tenant_id: None,
            patient: None,
            encounter: None,
            fhir_user: None,
            token_id: None,
            expires_at: None,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smart::ScopeOperation;

    #[test]
    fn test_from_access_token() {
        let claims = AccessTokenClaims {
            iss: "iss".to_string(),
            sub: "Practitioner/7".to_string(),
            aud: "aud".to_string(),
            exp: 2_000_000_000,
            iat: 1_999_999_000,
            jti: "jti-1".to_string(),
            scope: "openid patient/*.read".to_string(),
            client_id: "app".to_string(),
            patient: Some("123".to_string()),
            encounter: None,
            fhir_user: Some("Practitioner/7".to_string()),
            roles: vec!["practitioner".to_string()],
        };
        let identity = RequestIdentity::from_access_token(&claims);
        assert_eq!(identity.source, IdentitySource::LocalToken);
        assert_eq!(identity.token_id.as_deref(), Some("jti-1"));
        assert_eq!(identity.scopes, vec!["openid", "patient/*.read"]);
        assert!(identity.has_role("practitioner"));
        assert!(!identity.is_admin());
        assert!(identity.smart_scopes().permits("Observation", ScopeOperation::Read));
    }

    #[test]
    fn test_builders() {
        let identity = RequestIdentity::anonymous("svc", IdentitySource::ApiKey)
            .with_roles(&["admin"])
            .with_scopes(&["system/*.*"])
            .with_patient("p1");
        assert!(identity.is_admin());
        assert_eq!(identity.patient.as_deref(), Some("p1"));
        assert!(identity.smart_scopes().permits("Patient", ScopeOperation::Write));
    }
}
