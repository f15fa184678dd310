// File: supportbot-core/src/repositories/memory.rs

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::trace;

use supportbot_common::traits::store::KeyValueStore;

use crate::Error;

#[derive(Debug, Clone)]
struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
}

impl StoredValue {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Process-local store. TTLs are enforced lazily on access and by
/// [`InMemoryKeyValueStore::purge_expired`].
#[derive(Default)]
pub struct InMemoryKeyValueStore {
    entries: DashMap<String, StoredValue>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, v| !v.is_expired(now));
        let removed = before - self.entries.len();
        if removed > 0 {
            trace!("InMemoryKeyValueStore: purged {} expired entries", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        let now = Utc::now();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return Ok(Some(entry.bytes.clone()));
            }
        } else {
            return Ok(None);
        }
        // The read guard is gone by now; removing under it would deadlock.
        self.entries.remove_if(key, |_, v| v.is_expired(now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl_seconds: Option<u64>) -> Result<(), Error> {
        let expires_at = ttl_seconds.map(|ttl| Utc::now() + Duration::seconds(ttl as i64));
        self.entries.insert(key.to_string(), StoredValue { bytes: value, expires_at });
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), Error> {
        self.entries.remove(key);
        Ok(())
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>, Error> {
        let now = Utc::now();
        Ok(self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix) && !e.value().is_expired(now))
            .map(|e| e.key().clone())
            .collect())
    }
}
