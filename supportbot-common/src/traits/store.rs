use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Error;

/// Durable key-value storage used for sessions and rate-limit snapshots.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error>;

    /// Stores `value` under `key`; with a TTL the entry disappears afterwards.
    async fn set(&self, key: &str, value: Vec<u8>, ttl_seconds: Option<u64>) -> Result<(), Error>;

    async fn del(&self, key: &str) -> Result<(), Error>;

    /// All live keys starting with `prefix`, in no particular order.
    async fn scan(&self, prefix: &str) -> Result<Vec<String>, Error>;
}

/// JSON helpers on top of any [`KeyValueStore`], trait objects included.
#[async_trait]
pub trait KeyValueStoreExt: KeyValueStore {
    async fn get_json<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>, Error> {
        match self.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn set_json<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: Option<u64>,
    ) -> Result<(), Error> {
        let bytes = serde_json::to_vec(value)?;
        self.set(key, bytes, ttl_seconds).await
    }
}

impl<T: KeyValueStore + ?Sized> KeyValueStoreExt for T {}
