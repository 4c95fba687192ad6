//! Cached responses for idempotent write retries.
//!
//! A client retries a write with the same `Idempotency-Key`; the first
//! response is cached and replayed verbatim. Reusing a key for a different
//! method or path is a client error, reported separately from both a miss
//! and a replay.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use time::OffsetDateTime;

use crate::AuthResult;
use crate::config::IdempotencyConfig;
use crate::storage::IdempotencyStorage;

/// A cached response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    pub key: String,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub created_at: OffsetDateTime,
}

/// Result of looking up a key for an incoming request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyLookup {
    /// No usable record; execute the request.
    Miss,
    /// Same key, method and path: replay this response.
    Replay(IdempotencyRecord),
    /// Same key, different request.
    Mismatch { method: String, path: String },
}

/// In-memory, TTL-bounded [`IdempotencyStorage`].
#[derive(Debug)]
pub struct IdempotencyStore {
    ttl: Duration,
    records: RwLock<HashMap<String, IdempotencyRecord>>,
}

impl IdempotencyStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            records: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn from_config(config: &IdempotencyConfig) -> Self {
        Self::new(config.ttl)
    }

    fn is_live(&self, record: &IdempotencyRecord, now: OffsetDateTime) -> bool {
        record.created_at + self.ttl > now
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.records.read().len()
    }
}

#[async_trait]
impl IdempotencyStorage for IdempotencyStore {
    async fn get(&self, key: &str) -> AuthResult<Option<IdempotencyRecord>> {
        let now = OffsetDateTime::now_utc();
        Ok(self
            .records
            .read()
            .get(key)
            .filter(|r| self.is_live(r, now))
            .cloned())
    }

    async fn set(&self, record: IdempotencyRecord) -> AuthResult<()> {
        self.records.write().insert(record.key.clone(), record);
        Ok(())
    }

    async fn delete(&self, key: &str) -> AuthResult<bool> {
        Ok(self.records.write().remove(key).is_some())
    }

    async fn cleanup_expired(&self) -> AuthResult<u64> {
        let now = OffsetDateTime::now_utc();
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, r| self.is_live(r, now));
        Ok((before - records.len()) as u64)
    }
}
