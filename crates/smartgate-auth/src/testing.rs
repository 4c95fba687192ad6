//! Shared fixtures for unit tests.

use std::sync::OnceLock;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde_json::json;

/// A 2048-bit RSA key pair, generated once per test binary.
pub struct RsaTestKey {
    encoding: EncodingKey,
    n: String,
    e: String,
}

impl RsaTestKey {
    /// Public half as a JWK.
    pub fn jwk(&self, kid: &str, alg: &str) -> serde_json::Value {
        json!({
            "kty": "RSA",
            "kid": kid,
            "alg": alg,
            "use": "sig",
            "n": self.n,
            "e": self.e,
        })
    }

    /// Public half as a single-key set.
    pub fn jwks(&self, kid: &str, alg: &str) -> JwkSet {
        serde_json::from_value(json!({ "keys": [self.jwk(kid, alg)] })).unwrap()
    }

    /// Signs `claims` with the private half.
    pub fn sign(&self, alg: Algorithm, kid: Option<&str>, claims: &serde_json::Value) -> String {
        let mut header = Header::new(alg);
        header.kid = kid.map(ToString::to_string);
        jsonwebtoken::encode(&header, claims, &self.encoding).unwrap()
    }
}

pub fn rsa_key() -> &'static RsaTestKey {
    static KEY: OnceLock<RsaTestKey> = OnceLock::new();
    KEY.get_or_init(|| {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
        let pem = private.to_pkcs1_pem(LineEnding::LF).unwrap();
        let public = private.to_public_key();
        RsaTestKey {
            encoding: EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap(),
            n: URL_SAFE_NO_PAD.encode(public.n().to_bytes_be()),
            e: URL_SAFE_NO_PAD.encode(public.e().to_bytes_be()),
        }
    })
}
