//! Refresh token records.
//!
//! The plaintext token is returned to the client once; only its SHA-256
//! hash is stored.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::smart::LaunchContext;

/// A stored refresh token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshToken {
    /// Hex SHA-256 of the plaintext token.
    pub token_hash: String,

    pub client_id: String,

    /// Subject of the access tokens minted from this refresh token.
    pub subject: String,

    /// Space separated scope granted at authorization time.
    pub scope: String,

    /// Launch context preserved for subsequent refreshes.
    #[serde(default)]
    pub context: LaunchContext,

    #[serde(default)]
    pub roles: Vec<String>,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl RefreshToken {
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at <= OffsetDateTime::now_utc()
    }
}

/// Generates an opaque refresh token from 32 random bytes.
#[must_use]
pub fn generate_refresh_token() -> String {
    let mut bytes = [0u8; 32];
    rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Hex SHA-256 of a refresh token, used as its storage key.
#[must_use]
pub fn hash_refresh_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
