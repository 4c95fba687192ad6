//! RFC 7523 client assertion claims.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};

/// Claims of a `private_key_jwt` client assertion.
///
/// Every field is optional so that unverified parsing never fails on a
/// missing claim; presence is checked explicitly afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientAssertionClaims {
    #[serde(default)]
    pub iss: Option<String>,

    #[serde(default)]
    pub sub: Option<String>,

    #[serde(default)]
    pub aud: Option<Audience>,

    #[serde(default)]
    pub exp: Option<i64>,

    #[serde(default)]
    pub jti: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

/// `aud` may be a single string or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    #[must_use]
    pub fn contains(&self, value: &str) -> bool {
        match self {
            Self::One(aud) => aud == value,
            Self::Many(auds) => auds.iter().any(|a| a == value),
        }
    }
}

/// Reads assertion claims WITHOUT verifying the signature.
///
/// Only used to find the client and its keys; nothing read here is trusted
/// until the signature has been verified.
///
/// # Errors
///
/// Returns a short reason if the token is not a decodable JWT.
pub fn parse_unverified(assertion: &str) -> Result<ClientAssertionClaims, String> {
    let mut parts = assertion.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err("assertion is not a compact JWT".to_string());
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| "assertion payload is not base64url".to_string())?;
    serde_json::from_slice(&bytes).map_err(|e| format!("assertion payload is not JSON: {e}"))
}
