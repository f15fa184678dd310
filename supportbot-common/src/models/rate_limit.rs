// File: supportbot-common/src/models/rate_limit.rs

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Public channels and ticket threads are limited independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitContext {
    Public,
    Ticket,
}

impl fmt::Display for RateLimitContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitContext::Public => write!(f, "public"),
            RateLimitContext::Ticket => write!(f, "ticket"),
        }
    }
}

/// Per user and context. `query_timestamps` is the sliding window source of
/// truth and stays sorted ascending.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitRecord {
    pub query_timestamps: VecDeque<DateTime<Utc>>,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl RateLimitRecord {
    pub fn newest(&self) -> Option<DateTime<Utc>> {
        self.query_timestamps.back().copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitReason {
    Cooldown,
    PerMinute,
    PerHour,
}

impl fmt::Display for RateLimitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitReason::Cooldown => write!(f, "cooldown"),
            RateLimitReason::PerMinute => write!(f, "per_minute"),
            RateLimitReason::PerHour => write!(f, "per_hour"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub reason: Option<RateLimitReason>,
    pub retry_after_seconds: Option<u64>,
}

impl RateLimitDecision {
    pub fn allow() -> Self {
        Self { allowed: true, reason: None, retry_after_seconds: None }
    }

    pub fn reject(reason: RateLimitReason, retry_after_seconds: u64) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            retry_after_seconds: Some(retry_after_seconds),
        }
    }

    /// Plain-language wait time, e.g. "1 minute 5 seconds".
    pub fn human_wait(&self) -> String {
        let secs = self.retry_after_seconds.unwrap_or(0);
        let minutes = secs / 60;
        let rest = secs % 60;
        let plural = |n: u64, unit: &str| {
            if n == 1 { format!("1 {}", unit) } else { format!("{} {}s", n, unit) }
        };
        match (minutes, rest) {
            (0, s) => plural(s, "second"),
            (m, 0) => plural(m, "minute"),
            (m, s) => format!("{} {}", plural(m, "minute"), plural(s, "second")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_wait_formatting() {
        assert_eq!(RateLimitDecision::reject(RateLimitReason::Cooldown, 1).human_wait(), "1 second");
        assert_eq!(RateLimitDecision::reject(RateLimitReason::Cooldown, 7).human_wait(), "7 seconds");
        assert_eq!(RateLimitDecision::reject(RateLimitReason::PerHour, 120).human_wait(), "2 minutes");
        assert_eq!(
            RateLimitDecision::reject(RateLimitReason::PerMinute, 65).human_wait(),
            "1 minute 5 seconds"
        );
    }
}
