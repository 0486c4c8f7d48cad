//! Exponential backoff for queued edits.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::config::SyncConfig;
use crate::db::QueueItem;

/// Retry timing and limit for queued edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_retries: 5,
        }
    }
}

impl BackoffPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_retries: config.max_retries,
        }
    }

    /// `min(initial_delay * 2^retries, max_delay)`, saturating on overflow.
    pub fn delay_for(&self, retries: u32) -> Duration {
        2u32.checked_pow(retries)
            .and_then(|factor| self.initial_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Whether enough time has passed since the item's last attempt (or its
    /// creation) for another attempt.
    pub fn is_eligible(&self, item: &QueueItem, now: DateTime<Utc>) -> bool {
        let elapsed = now - item.backoff_anchor();
        match chrono::Duration::from_std(self.delay_for(item.retries)) {
            Ok(delay) => elapsed >= delay,
            Err(_) => false,
        }
    }

    pub fn is_exhausted(&self, retries: u32) -> bool {
        retries >= self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_until_capped() {
        let policy = BackoffPolicy::default();
        let expected = [1, 2, 4, 8, 16, 32, 60, 60];
        for (retries, secs) in expected.iter().enumerate() {
            assert_eq!(policy.delay_for(retries as u32), Duration::from_secs(*secs));
        }
    }

    #[test]
    fn test_delay_is_non_decreasing() {
        let policy = BackoffPolicy::default();
        let mut previous = Duration::ZERO;
        for retries in 0..policy.max_retries {
            let delay = policy.delay_for(retries);
            assert_eq!(
                delay,
                (policy.initial_delay * 2u32.pow(retries)).min(policy.max_delay)
            );
            assert!(delay >= previous);
            previous = delay;
        }
    }

    #[test]
    fn test_huge_retry_count_saturates_to_max() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(40), policy.max_delay);
        assert_eq!(policy.delay_for(u32::MAX), policy.max_delay);
    }

    #[test]
    fn test_eligibility_measured_from_last_attempt() {
        let policy = BackoffPolicy::default();
        let created = Utc::now();
        let mut item = QueueItem::new("p1", 1, created, vec![], created);

        assert!(!policy.is_eligible(&item, created));
        assert!(!policy.is_eligible(&item, created + chrono::Duration::milliseconds(999)));
        assert!(policy.is_eligible(&item, created + chrono::Duration::seconds(1)));

        item.retries = 2;
        item.last_retry_at = Some(created + chrono::Duration::seconds(10));
        assert!(!policy.is_eligible(&item, created + chrono::Duration::seconds(13)));
        assert!(policy.is_eligible(&item, created + chrono::Duration::seconds(14)));
    }

    #[test]
    fn test_from_config() {
        let config = SyncConfig {
            initial_delay_ms: 250,
            max_delay_ms: 2_000,
            max_retries: 3,
            interval_secs: 10,
        };
        let policy = BackoffPolicy::from_config(&config);
        assert_eq!(policy.delay_for(0), Duration::from_millis(250));
        assert_eq!(policy.delay_for(5), Duration::from_secs(2));
        assert!(policy.is_exhausted(3));
        assert!(!policy.is_exhausted(2));
    }
}
