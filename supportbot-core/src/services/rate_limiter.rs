// File: supportbot-core/src/services/rate_limiter.rs

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::{debug, info, warn};

use supportbot_common::models::rate_limit::{
    RateLimitContext, RateLimitDecision, RateLimitReason, RateLimitRecord,
};
use supportbot_common::traits::store::{KeyValueStore, KeyValueStoreExt};

use crate::Error;
use crate::config::{RateLimitConfig, RateLimitSettings};

pub const RATE_LIMIT_PREFIX: &str = "ratelimit:";

fn storage_key(user_id: &str, context: RateLimitContext) -> String {
    format!("{}{}:{}", RATE_LIMIT_PREFIX, context, user_id)
}

fn parse_storage_key(raw: &str) -> Option<(String, RateLimitContext)> {
    let rest = raw.strip_prefix(RATE_LIMIT_PREFIX)?;
    let (context, user) = rest.split_once(':')?;
    let context = match context {
        "public" => RateLimitContext::Public,
        "ticket" => RateLimitContext::Ticket,
        _ => return None,
    };
    Some((user.to_string(), context))
}

/// Whole seconds until `elapsed` reaches `span`, rounded up.
fn seconds_until(span: Duration, elapsed: Duration) -> u64 {
    let remaining_ms = (span - elapsed).num_milliseconds().max(0) as u64;
    remaining_ms.div_ceil(1000)
}

/// Sliding-window limiter plus a per-user cooldown. Records are keyed by
/// user and context; each check runs under that record's map shard lock.
pub struct RateLimiter {
    settings: RateLimitSettings,
    records: DashMap<(String, RateLimitContext), RateLimitRecord>,
}

impl RateLimiter {
    pub fn new(settings: RateLimitSettings) -> Self {
        Self { settings, records: DashMap::new() }
    }

    pub fn config(&self, context: RateLimitContext) -> &RateLimitConfig {
        self.settings.for_context(context)
    }

    pub fn check_and_record(
        &self,
        user_id: &str,
        context: RateLimitContext,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let cfg = self.settings.for_context(context);
        let cooldown = Duration::seconds(cfg.cooldown_seconds as i64);
        let minute = Duration::seconds(cfg.minute_window_seconds as i64);
        let hour = Duration::seconds(cfg.hour_window_seconds as i64);
        let retention = Duration::seconds(cfg.retention_seconds() as i64);

        let mut record = self.records.entry((user_id.to_string(), context)).or_default();

        // Lazy pruning on every touch keeps the deque bounded.
        while record.query_timestamps.front().is_some_and(|t| *t <= now - retention) {
            record.query_timestamps.pop_front();
        }

        if let Some(last) = record.last_message_at {
            let elapsed = now - last;
            if elapsed < cooldown {
                record.last_message_at = Some(now);
                let retry = seconds_until(cooldown, elapsed);
                debug!("{} rate limit: user {} in cooldown, retry in {}s", context, user_id, retry);
                return RateLimitDecision::reject(RateLimitReason::Cooldown, retry);
            }
        }

        for (window, max, reason) in [
            (minute, cfg.max_per_minute, RateLimitReason::PerMinute),
            (hour, cfg.max_per_hour, RateLimitReason::PerHour),
        ] {
            let start = now - window;
            let mut counted = record.query_timestamps.iter().filter(|t| **t > start);
            let oldest = counted.next().copied();
            let count = oldest.map_or(0, |_| 1 + counted.count());
            if count >= max {
                let retry = oldest
                    .map(|t| seconds_until(window, now - t).max(1))
                    .unwrap_or(window.num_seconds() as u64);
                debug!(
                    "{} rate limit: user {} hit {} ({} in window), retry in {}s",
                    context, user_id, reason, count, retry
                );
                return RateLimitDecision::reject(reason, retry);
            }
        }

        record.query_timestamps.push_back(now);
        record.last_message_at = Some(now);
        RateLimitDecision::allow()
    }

    pub fn record(&self, user_id: &str, context: RateLimitContext) -> Option<RateLimitRecord> {
        self.records
            .get(&(user_id.to_string(), context))
            .map(|r| r.value().clone())
    }

    pub fn reset(&self, user_id: &str, context: RateLimitContext) {
        self.records.remove(&(user_id.to_string(), context));
    }

    /// Drops records whose newest activity is older than their largest
    /// window. Returns how many were removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records.retain(|(_, context), record| {
            let retention = Duration::seconds(self.settings.for_context(*context).retention_seconds() as i64);
            let newest = match (record.newest(), record.last_message_at) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
            newest.is_some_and(|t| t > now - retention)
        });
        let removed = before - self.records.len();
        if removed > 0 {
            debug!("Rate limiter sweep removed {} idle record(s)", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Writes every record to the store with a TTL of its hour window so a
    /// restart does not hand out a fresh allowance.
    pub async fn snapshot(&self, store: &Arc<dyn KeyValueStore>) -> Result<usize, Error> {
        let records: Vec<((String, RateLimitContext), RateLimitRecord)> = self
            .records
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        for ((user, context), record) in &records {
            let ttl = self.settings.for_context(*context).retention_seconds();
            store.set_json(&storage_key(user, *context), record, Some(ttl)).await?;
        }
        Ok(records.len())
    }

    pub async fn restore(&self, store: &Arc<dyn KeyValueStore>) -> Result<usize, Error> {
        let mut restored = 0;
        for raw in store.scan(RATE_LIMIT_PREFIX).await? {
            let Some((user, context)) = parse_storage_key(&raw) else {
                warn!("Ignoring malformed rate limit key '{}'", raw);
                continue;
            };
            if let Some(record) = store.get_json::<RateLimitRecord>(&raw).await? {
                self.records.insert((user, context), record);
                restored += 1;
            }
        }
        if restored > 0 {
            info!("Restored {} rate limit record(s) from the store", restored);
        }
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::repositories::memory::InMemoryKeyValueStore;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
    }

    fn limiter(public: RateLimitConfig) -> RateLimiter {
        RateLimiter::new(RateLimitSettings { public, ticket: RateLimitConfig::ticket_defaults() })
    }

    fn no_cooldown(max_per_minute: usize, max_per_hour: usize) -> RateLimitConfig {
        RateLimitConfig { cooldown_seconds: 0, max_per_minute, max_per_hour, ..RateLimitConfig::public_defaults() }
    }

    #[test]
    fn test_sliding_minute_window() {
        let rl = limiter(no_cooldown(5, 100));
        for s in 0..5 {
            assert!(rl.check_and_record("u", RateLimitContext::Public, t0() + Duration::seconds(s)).allowed);
        }

        let sixth = rl.check_and_record("u", RateLimitContext::Public, t0() + Duration::seconds(5));
        assert!(!sixth.allowed);
        assert_eq!(sixth.reason, Some(RateLimitReason::PerMinute));
        assert_eq!(sixth.retry_after_seconds, Some(55));

        let seventh = rl.check_and_record("u", RateLimitContext::Public, t0() + Duration::seconds(61));
        assert!(seventh.allowed);
    }

    #[test]
    fn test_cooldown_retry_after() {
        let rl = limiter(RateLimitConfig { cooldown_seconds: 10, ..RateLimitConfig::public_defaults() });
        assert!(rl.check_and_record("u", RateLimitContext::Public, t0()).allowed);

        let second = rl.check_and_record("u", RateLimitContext::Public, t0() + Duration::seconds(3));
        assert!(!second.allowed);
        assert_eq!(second.reason, Some(RateLimitReason::Cooldown));
        assert_eq!(second.retry_after_seconds, Some(7));
    }

    #[test]
    fn test_cooldown_rejection_restarts_cooldown() {
        let rl = limiter(RateLimitConfig { cooldown_seconds: 10, ..RateLimitConfig::public_defaults() });
        rl.check_and_record("u", RateLimitContext::Public, t0());
        rl.check_and_record("u", RateLimitContext::Public, t0() + Duration::seconds(8));

        let third = rl.check_and_record("u", RateLimitContext::Public, t0() + Duration::seconds(12));
        assert_eq!(third.reason, Some(RateLimitReason::Cooldown));
        assert_eq!(third.retry_after_seconds, Some(6));
        let record = rl.record("u", RateLimitContext::Public).unwrap();
        assert_eq!(record.query_timestamps.len(), 1);
    }

    #[test]
    fn test_per_hour_limit() {
        let rl = limiter(no_cooldown(100, 3));
        for m in 0..3 {
            assert!(rl.check_and_record("u", RateLimitContext::Public, t0() + Duration::minutes(m * 10)).allowed);
        }
        let blocked = rl.check_and_record("u", RateLimitContext::Public, t0() + Duration::minutes(30));
        assert_eq!(blocked.reason, Some(RateLimitReason::PerHour));
        assert_eq!(blocked.retry_after_seconds, Some(30 * 60));
    }

    #[test]
    fn test_contexts_are_independent() {
        let rl = limiter(RateLimitConfig { cooldown_seconds: 60, ..RateLimitConfig::public_defaults() });
        assert!(rl.check_and_record("u", RateLimitContext::Public, t0()).allowed);
        assert!(rl.check_and_record("u", RateLimitContext::Ticket, t0() + Duration::seconds(1)).allowed);
        assert!(!rl.check_and_record("u", RateLimitContext::Public, t0() + Duration::seconds(2)).allowed);
    }

    #[test]
    fn test_sweep_drops_idle_records() {
        let rl = limiter(no_cooldown(5, 30));
        rl.check_and_record("old", RateLimitContext::Public, t0());
        rl.check_and_record("fresh", RateLimitContext::Public, t0() + Duration::minutes(50));

        assert_eq!(rl.sweep(t0() + Duration::minutes(70)), 1);
        assert!(rl.record("old", RateLimitContext::Public).is_none());
        assert!(rl.record("fresh", RateLimitContext::Public).is_some());
    }

    #[test]
    fn test_storage_key_parsing() {
        assert_eq!(storage_key("42", RateLimitContext::Ticket), "ratelimit:ticket:42");
        assert_eq!(
            parse_storage_key("ratelimit:public:42"),
            Some(("42".to_string(), RateLimitContext::Public))
        );
        assert_eq!(parse_storage_key("ratelimit:dm:42"), None);
    }

    #[tokio::test]
    async fn test_snapshot_and_restore() -> Result<(), Error> {
        let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryKeyValueStore::new());
        let now = Utc::now();
        let rl = limiter(no_cooldown(1, 10));
        rl.check_and_record("u", RateLimitContext::Public, now);
        assert_eq!(rl.snapshot(&store).await?, 1);

        let restarted = limiter(no_cooldown(1, 10));
        assert_eq!(restarted.restore(&store).await?, 1);
        let decision = restarted.check_and_record("u", RateLimitContext::Public, now + Duration::seconds(1));
        assert_eq!(decision.reason, Some(RateLimitReason::PerMinute));
        Ok(())
    }
}
