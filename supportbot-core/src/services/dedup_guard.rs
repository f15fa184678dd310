// File: supportbot-core/src/services/dedup_guard.rs

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
struct DedupEntry {
    in_flight: bool,
    marked_at: DateTime<Utc>,
    /// Distinguishes a reclaimed marker from the one it replaced.
    generation: u64,
}

/// Short-lived in-flight markers that let exactly one handler run the
/// creation side effects for a resource when the platform delivers the same
/// "created" event several times.
pub struct DedupGuard {
    entries: DashMap<String, DedupEntry>,
    stale_after: Duration,
    next_generation: AtomicU64,
}

impl DedupGuard {
    pub fn new(stale_after_seconds: u64) -> Self {
        Self {
            entries: DashMap::new(),
            stale_after: Duration::seconds(i64::try_from(stale_after_seconds).unwrap_or(i64::MAX).min(i64::MAX / 1000)),
            next_generation: AtomicU64::new(1),
        }
    }

    /// `true` for exactly one caller per burst. Entries older than the stale
    /// timeout count as released.
    pub fn try_acquire(&self, resource_key: &str) -> bool {
        self.try_acquire_at(resource_key, Utc::now())
    }

    pub fn try_acquire_at(&self, resource_key: &str, now: DateTime<Utc>) -> bool {
        self.claim_at(resource_key, now).is_some()
    }

    /// Marks the key in flight and returns the generation of the new marker.
    fn claim_at(&self, resource_key: &str, now: DateTime<Utc>) -> Option<u64> {
        let generation = match self.entries.entry(resource_key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get();
                if entry.in_flight && now - entry.marked_at < self.stale_after {
                    debug!("Dedup: '{}' already in flight, ignoring duplicate", resource_key);
                    return None;
                }
                if entry.in_flight {
                    warn!("Dedup: reclaiming stale marker for '{}'", resource_key);
                }
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                occupied.insert(DedupEntry { in_flight: true, marked_at: now, generation });
                generation
            }
            Entry::Vacant(vacant) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                vacant.insert(DedupEntry { in_flight: true, marked_at: now, generation });
                generation
            }
        };
        Some(generation)
    }

    /// Drops the key's marker whoever holds it.
    pub fn release(&self, resource_key: &str) {
        self.entries.remove(resource_key);
    }

    /// Drops the marker only if it is still the one claimed as `generation`.
    /// A holder whose marker went stale and was reclaimed leaves the new
    /// holder's marker alone.
    fn release_claim(&self, resource_key: &str, generation: u64) -> bool {
        let removed = self.entries.remove_if(resource_key, |_, e| e.generation == generation).is_some();
        if !removed {
            debug!("Dedup: marker for '{}' was reclaimed, leaving it in place", resource_key);
        }
        removed
    }

    /// Like [`DedupGuard::try_acquire`] but hands back a permit that releases
    /// its own marker when dropped, error paths and panics included.
    pub fn acquire_scoped(self: &Arc<Self>, resource_key: &str) -> Option<DedupPermit> {
        self.acquire_scoped_at(resource_key, Utc::now())
    }

    pub fn acquire_scoped_at(self: &Arc<Self>, resource_key: &str, now: DateTime<Utc>) -> Option<DedupPermit> {
        let generation = self.claim_at(resource_key, now)?;
        Some(DedupPermit { guard: Arc::clone(self), key: resource_key.to_string(), generation })
    }

    pub fn is_in_flight(&self, resource_key: &str) -> bool {
        self.entries.get(resource_key).is_some_and(|e| e.in_flight)
    }

    /// Removes markers older than the stale timeout.
    pub fn evict_stale(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| now - e.marked_at < self.stale_after);
        let evicted = before - self.entries.len();
        if evicted > 0 {
            warn!("Dedup: evicted {} stale marker(s); a handler may have crashed", evicted);
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct DedupPermit {
    guard: Arc<DedupGuard>,
    key: String,
    generation: u64,
}

impl DedupPermit {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for DedupPermit {
    fn drop(&mut self) {
        self.guard.release_claim(&self.key, self.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_second_acquire_is_refused_until_release() {
        let guard = DedupGuard::new(30);
        assert!(guard.try_acquire("thread:1"));
        assert!(!guard.try_acquire("thread:1"));
        assert!(guard.try_acquire("thread:2"));

        guard.release("thread:1");
        assert!(guard.try_acquire("thread:1"));
    }

    #[test]
    fn test_stale_marker_counts_as_released() {
        let guard = DedupGuard::new(30);
        let t0 = Utc::now();
        assert!(guard.try_acquire_at("k", t0));
        assert!(!guard.try_acquire_at("k", t0 + Duration::seconds(29)));
        assert!(guard.try_acquire_at("k", t0 + Duration::seconds(31)));
    }

    #[test]
    fn test_evict_stale() {
        let guard = DedupGuard::new(30);
        let t0 = Utc::now();
        guard.try_acquire_at("old", t0);
        guard.try_acquire_at("new", t0 + Duration::seconds(20));
        assert_eq!(guard.evict_stale(t0 + Duration::seconds(40)), 1);
        assert!(guard.is_in_flight("new"));
        assert!(!guard.is_in_flight("old"));
    }

    #[test]
    fn test_permit_releases_on_drop() {
        let guard = Arc::new(DedupGuard::new(30));
        {
            let permit = guard.acquire_scoped("k").unwrap();
            assert_eq!(permit.key(), "k");
            assert!(guard.acquire_scoped("k").is_none());
        }
        assert!(guard.is_empty());
        assert!(guard.acquire_scoped("k").is_some());
    }

    #[test]
    fn test_stale_holder_does_not_release_reclaimed_marker() {
        let guard = Arc::new(DedupGuard::new(30));
        let t0 = Utc::now();
        let slow = guard.acquire_scoped_at("k", t0).unwrap();
        let reclaimed = guard.acquire_scoped_at("k", t0 + Duration::seconds(31)).unwrap();

        drop(slow);
        assert!(guard.is_in_flight("k"));
        assert!(guard.acquire_scoped_at("k", t0 + Duration::seconds(32)).is_none());

        drop(reclaimed);
        assert!(guard.is_empty());
    }

    #[test]
    fn test_huge_stale_timeout_does_not_overflow() {
        let guard = DedupGuard::new(u64::MAX);
        assert!(guard.try_acquire("k"));
        assert!(!guard.try_acquire("k"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_burst_has_single_winner() {
        let guard = Arc::new(DedupGuard::new(30));
        let winners = Arc::new(AtomicUsize::new(0));

        let tasks = (0..32).map(|_| {
            let guard = guard.clone();
            let winners = winners.clone();
            tokio::spawn(async move {
                if let Some(_permit) = guard.acquire_scoped("thread:burst") {
                    winners.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                }
            })
        });
        for result in join_all(tasks).await {
            result.unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert!(guard.is_empty());
    }
}
