//! EHR launch contexts.
//!
//! An EHR creates a launch context before opening an app; the app passes
//! the returned `launch` id to `/authorize`, which consumes it exactly once
//! and copies the patient, encounter and user into the authorization code.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Context carried from a launch into codes, tokens and refresh tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encounter: Option<String>,

    /// User (practitioner) reference, surfaced as `fhirUser`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl LaunchContext {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patient.is_none() && self.encounter.is_none() && self.user.is_none()
    }
}

/// A launch context waiting to be consumed by `/authorize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredLaunchContext {
    pub launch_id: String,

    #[serde(flatten)]
    pub context: LaunchContext,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl StoredLaunchContext {
    /// Creates a context with a fresh random id expiring after `ttl`.
    #[must_use]
    pub fn new(context: LaunchContext, ttl: std::time::Duration) -> Self {
        let created_at = OffsetDateTime::now_utc();
        Self {
            launch_id: generate_launch_id(),
            context,
            created_at,
            expires_at: created_at + ttl,
        }
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at <= OffsetDateTime::now_utc()
    }
}

/// Default launch context lifetime in seconds.
pub const DEFAULT_LAUNCH_CONTEXT_TTL: u64 = 600;

/// Generates a launch id from 32 random bytes, base64url encoded.
#[must_use]
pub fn generate_launch_id() -> String {
    let mut bytes = [0u8; 32];
    rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_launch_ids_are_unique_and_urlsafe() {
        let a = generate_launch_id();
        let b = generate_launch_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_stored_context_expiry() {
        let ctx = StoredLaunchContext::new(
            LaunchContext {
                patient: Some("123".to_string()),
                ..Default::default()
            },
            Duration::from_secs(DEFAULT_LAUNCH_CONTEXT_TTL),
        );
        assert!(!ctx.is_expired());

        let mut expired = ctx.clone();
        expired.expires_at = OffsetDateTime::now_utc() - Duration::from_secs(1);
        assert!(expired.is_expired());
    }

    #[test]
    fn test_context_serialization_flattens() {
        let ctx = StoredLaunchContext::new(
            LaunchContext {
                patient: Some("123".to_string()),
                encounter: Some("enc-1".to_string()),
                user: None,
            },
            Duration::from_secs(60),
        );
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["patient"], "123");
        assert_eq!(json["encounter"], "enc-1");
        assert!(json.get("user").is_none());
    }

    #[test]
    fn test_empty_context() {
        assert!(LaunchContext::default().is_empty());
    }
}
