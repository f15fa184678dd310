// File: supportbot-core/src/repositories/retry.rs

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, warn};

use supportbot_common::traits::store::KeyValueStore;

use crate::Error;
use crate::config::RetryConfig;

/// Longest single wait between two attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Wraps a store and retries retryable failures with exponential backoff
/// before surfacing them as hard failures.
pub struct RetryingStore {
    inner: Arc<dyn KeyValueStore>,
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryingStore {
    pub fn new(inner: Arc<dyn KeyValueStore>, config: &RetryConfig) -> Self {
        Self {
            inner,
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
        }
    }

    /// Exponential backoff before retry number `tries`, capped at [`MAX_BACKOFF`].
    fn backoff(&self, tries: u32) -> Duration {
        let factor = 2u32.checked_pow(tries.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(MAX_BACKOFF)
    }

    async fn with_retry<T, F, Fut>(&self, op: &str, key: &str, mut attempt: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let mut tries = 0;
        loop {
            tries += 1;
            match attempt().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && tries < self.max_attempts => {
                    let delay = self.backoff(tries);
                    warn!(
                        "store {} '{}' failed (attempt {}/{}): {}. Retrying in {:?}",
                        op, key, tries, self.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!("store {} '{}' failed after {} attempt(s): {}", op, key, tries, e);
                    return Err(e);
                }
            }
        }
    }
}

#[async_trait]
impl KeyValueStore for RetryingStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        let inner = self.inner.as_ref();
        self.with_retry("get", key, move || inner.get(key)).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl_seconds: Option<u64>) -> Result<(), Error> {
        let inner = self.inner.as_ref();
        self.with_retry("set", key, move || inner.set(key, value.clone(), ttl_seconds))
            .await
    }

    async fn del(&self, key: &str) -> Result<(), Error> {
        let inner = self.inner.as_ref();
        self.with_retry("del", key, move || inner.del(key)).await
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>, Error> {
        let inner = self.inner.as_ref();
        self.with_retry("scan", prefix, move || inner.scan(prefix)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::repositories::memory::InMemoryKeyValueStore;

    /// Fails the first `failures` calls to `get`, then delegates.
    struct FlakyStore {
        inner: InMemoryKeyValueStore,
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl KeyValueStore for FlakyStore {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(Error::ExternalService("connection reset".into()));
            }
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<u64>) -> Result<(), Error> {
            self.inner.set(key, value, ttl).await
        }
        async fn del(&self, _key: &str) -> Result<(), Error> {
            Err(Error::Config("not retryable".into()))
        }
        async fn scan(&self, prefix: &str) -> Result<Vec<String>, Error> {
            self.inner.scan(prefix).await
        }
    }

    fn flaky(failures: u32) -> Arc<FlakyStore> {
        Arc::new(FlakyStore {
            inner: InMemoryKeyValueStore::new(),
            failures,
            calls: AtomicU32::new(0),
        })
    }

    fn retry_config() -> RetryConfig {
        RetryConfig { max_attempts: 3, base_delay_ms: 1 }
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() -> Result<(), Error> {
        let inner = flaky(2);
        let store = RetryingStore::new(inner.clone(), &retry_config());
        store.set("k", b"v".to_vec(), None).await?;

        assert_eq!(store.get("k").await?, Some(b"v".to_vec()));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let inner = flaky(10);
        let store = RetryingStore::new(inner.clone(), &retry_config());

        let result = store.get("k").await;
        assert!(matches!(result, Err(Error::ExternalService(_))));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_backoff_doubles_and_saturates() {
        let store = RetryingStore::new(flaky(0), &RetryConfig { max_attempts: u32::MAX, base_delay_ms: 100 });
        assert_eq!(store.backoff(1), Duration::from_millis(100));
        assert_eq!(store.backoff(2), Duration::from_millis(200));
        assert_eq!(store.backoff(4), Duration::from_millis(800));
        assert_eq!(store.backoff(40), MAX_BACKOFF);
        assert_eq!(store.backoff(u32::MAX), MAX_BACKOFF);

        let huge = RetryingStore::new(flaky(0), &RetryConfig { max_attempts: 3, base_delay_ms: u64::MAX });
        assert_eq!(huge.backoff(3), MAX_BACKOFF);
    }

    #[tokio::test]
    async fn test_non_retryable_errors_fail_fast() {
        let store = RetryingStore::new(flaky(0), &retry_config());
        assert!(matches!(store.del("k").await, Err(Error::Config(_))));
    }
}
