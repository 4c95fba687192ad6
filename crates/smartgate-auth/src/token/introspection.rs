//! Token introspection responses (RFC 7662).

use serde::{Deserialize, Serialize};

use super::jwt::AccessTokenClaims;

/// Introspection response body.
///
/// Inactive tokens serialize to exactly `{"active":false}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntrospectionResponse {
    pub active: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encounter: Option<String>,

    #[serde(rename = "fhirUser", default, skip_serializing_if = "Option::is_none")]
    pub fhir_user: Option<String>,
}

impl IntrospectionResponse {
    #[must_use]
    pub fn inactive() -> Self {
        Self::default()
    }
}

impl From<AccessTokenClaims> for IntrospectionResponse {
    fn from(claims: AccessTokenClaims) -> Self {
        Self {
            active: true,
            scope: Some(claims.scope),
            client_id: Some(claims.client_id),
            sub: Some(claims.sub),
            iss: Some(claims.iss),
            aud: Some(claims.aud),
            exp: Some(claims.exp),
            iat: Some(claims.iat),
            jti: Some(claims.jti),
            token_type: Some("Bearer".to_string()),
            patient: claims.patient,
            encounter: claims.encounter,
            fhir_user: claims.fhir_user,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inactive_serializes_minimal() {
        let json = serde_json::to_string(&IntrospectionResponse::inactive()).unwrap();
        assert_eq!(json, r#"{"active":false}"#);
    }

    #[test]
    fn test_from_claims() {
        let claims = AccessTokenClaims {
            iss: "https://auth.example.com".to_string(),
            sub: "client-1".to_string(),
            aud: "https://fhir.example.com".to_string(),
            exp: 2_000_000_000,
            iat: 1_999_999_000,
            jti: "abc".to_string(),
            scope: "system/*.read".to_string(),
            client_id: "client-1".to_string(),
            patient: Some("123".to_string()),
            encounter: None,
            fhir_user: None,
            roles: vec![],
        };
        let response = IntrospectionResponse::from(claims);
        assert!(response.active);
        assert_eq!(response.patient.as_deref(), Some("123"));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["token_type"], "Bearer");
        assert!(json.get("fhirUser").is_none());
    }
}
