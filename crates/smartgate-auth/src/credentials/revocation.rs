//! Access token denylist.
//!
//! Access tokens are self-contained, so revocation is a denylist of token
//! ids (`jti`). An entry is only useful until the token would have expired
//! anyway; the sweep drops it after that.
//!
//! [`RevocationStore`] is the in-memory [`RevocationStorage`] backend.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::AuthResult;
use crate::storage::RevocationStorage;

/// A denylisted token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationEntry {
    pub token_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,

    #[serde(with = "time::serde::rfc3339")]
    pub revoked_at: OffsetDateTime,
}

#[derive(Debug, Default)]
struct RevocationState {
    revoked: HashMap<String, RevocationEntry>,
    /// user id -> (token id -> token expiry) for tokens seen in use.
    seen_by_user: HashMap<String, HashMap<String, OffsetDateTime>>,
}

/// In-memory, concurrency-safe token denylist.
#[derive(Debug, Default)]
pub struct RevocationStore {
    state: RwLock<RevocationState>,
}

impl RevocationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn is_recorded(&self, user_id: &str, token_id: &str) -> bool {
        self.state
            .read()
            .seen_by_user
            .get(user_id)
            .is_some_and(|tokens| tokens.contains_key(token_id))
    }

    #[cfg(test)]
    fn tracked_users(&self) -> usize {
        self.state.read().seen_by_user.len()
    }
}

#[async_trait]
impl RevocationStorage for RevocationStore {
    async fn revoke(
        &self,
        token_id: &str,
        user_id: Option<&str>,
        expires_at: OffsetDateTime,
    ) -> AuthResult<RevocationEntry> {
        let entry = RevocationEntry {
            token_id: token_id.to_string(),
            user_id: user_id.map(ToString::to_string),
            expires_at,
            revoked_at: OffsetDateTime::now_utc(),
        };
        self.state
            .write()
            .revoked
            .insert(entry.token_id.clone(), entry.clone());
        tracing::info!(token_id = %token_id, "Token revoked");
        Ok(entry)
    }

    async fn record_token(
        &self,
        user_id: &str,
        token_id: &str,
        expires_at: OffsetDateTime,
    ) -> AuthResult<()> {
        if self.is_recorded(user_id, token_id) {
            return Ok(());
        }
        self.state
            .write()
            .seen_by_user
            .entry(user_id.to_string())
            .or_default()
            .insert(token_id.to_string(), expires_at);
        Ok(())
    }

    async fn revoke_all_for_user(&self, user_id: &str) -> AuthResult<usize> {
        let now = OffsetDateTime::now_utc();
        let mut state = self.state.write();
        let Some(tokens) = state.seen_by_user.get(user_id).cloned() else {
            return Ok(0);
        };

        let mut count = 0;
        for (token_id, expires_at) in tokens {
            if expires_at <= now || state.revoked.contains_key(&token_id) {
                continue;
            }
            state.revoked.insert(
                token_id.clone(),
                RevocationEntry {
                    token_id,
                    user_id: Some(user_id.to_string()),
                    expires_at,
                    revoked_at: now,
                },
            );
            count += 1;
        }
        drop(state);

        tracing::info!(user_id = %user_id, revoked = count, "Revoked all known tokens for user");
        Ok(count)
    }

    async fn is_revoked(&self, token_id: &str) -> AuthResult<bool> {
        Ok(self.state.read().revoked.contains_key(token_id))
    }

    async fn list_active(&self) -> AuthResult<Vec<RevocationEntry>> {
        let now = OffsetDateTime::now_utc();
        let mut entries: Vec<_> = self
            .state
            .read()
            .revoked
            .values()
            .filter(|e| e.expires_at > now)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.revoked_at.cmp(&a.revoked_at));
        Ok(entries)
    }

    async fn cleanup_expired(&self) -> AuthResult<u64> {
        let now = OffsetDateTime::now_utc();
        let mut state = self.state.write();

        let before = state.revoked.len();
        state.revoked.retain(|_, e| e.expires_at > now);
        let removed = (before - state.revoked.len()) as u64;

        state.seen_by_user.retain(|_, tokens| {
            tokens.retain(|_, expires_at| *expires_at > now);
            !tokens.is_empty()
        });

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_secs(secs: i64) -> OffsetDateTime {
        OffsetDateTime::now_utc() + time::Duration::seconds(secs)
    }

    #[tokio::test]
    async fn test_revoke_and_check() {
        let store = RevocationStore::new();
        assert!(!store.is_revoked("jti-1").await.unwrap());
        store.revoke("jti-1", None, in_secs(300)).await.unwrap();
        assert!(store.is_revoked("jti-1").await.unwrap());
        assert!(!store.is_revoked("jti-2").await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_for_user_records_owner() {
        let store = RevocationStore::new();
        let entry = store
            .revoke_for_user("jti-1", "user-1", in_secs(300))
            .await
            .unwrap();
        assert_eq!(entry.user_id.as_deref(), Some("user-1"));
        assert_eq!(store.list_active().await.unwrap(), vec![entry]);
    }

    #[tokio::test]
    async fn test_revoke_all_for_user_only_covers_seen_tokens() {
        let store = RevocationStore::new();
        store.record_token("user-1", "jti-a", in_secs(300)).await.unwrap();
        store.record_token("user-1", "jti-b", in_secs(300)).await.unwrap();
        store.record_token("user-2", "jti-c", in_secs(300)).await.unwrap();

        assert_eq!(store.revoke_all_for_user("user-1").await.unwrap(), 2);
        assert!(store.is_revoked("jti-a").await.unwrap());
        assert!(store.is_revoked("jti-b").await.unwrap());
        assert!(!store.is_revoked("jti-c").await.unwrap());
        assert!(!store.is_revoked("jti-never-seen").await.unwrap());

        // already denylisted tokens are not counted twice
        assert_eq!(store.revoke_all_for_user("user-1").await.unwrap(), 0);
        assert_eq!(store.revoke_all_for_user("nobody").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_recording_a_known_token_takes_no_write_lock() {
        let store = RevocationStore::new();
        store.record_token("user-1", "jti-a", in_secs(300)).await.unwrap();

        // a held read lock would deadlock any writer
        let guard = store.state.read();
        store.record_token("user-1", "jti-a", in_secs(300)).await.unwrap();
        drop(guard);

        store.record_token("user-1", "jti-b", in_secs(300)).await.unwrap();
        assert_eq!(store.state.read().seen_by_user["user-1"].len(), 2);
    }

    #[tokio::test]
    async fn test_cleanup_drops_expired_and_prunes_index() {
        let store = RevocationStore::new();
        store.revoke("expired", None, in_secs(-1)).await.unwrap();
        store.revoke("live", None, in_secs(300)).await.unwrap();
        store.record_token("user-1", "old", in_secs(-1)).await.unwrap();
        store.record_token("user-2", "fresh", in_secs(300)).await.unwrap();

        assert_eq!(store.list_active().await.unwrap().len(), 1);
        assert_eq!(store.cleanup_expired().await.unwrap(), 1);
        assert!(!store.is_revoked("expired").await.unwrap());
        assert!(store.is_revoked("live").await.unwrap());
        assert_eq!(store.tracked_users(), 1);
    }
}
