//! Per-key token-bucket admission
//!
//! Refill is computed lazily from elapsed time on every acquire; no
//! background timer wakes up idle buckets. The map entry lock makes the
//! read-modify-write of (tokens, last_refill) atomic under concurrent
//! acquires on the same key.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use crate::clock::SharedClock;

/// Bucket sizing, shared by every key
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Maximum burst size in tokens
    pub capacity: u32,
    /// Tokens added per second
    pub refill_per_second: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            refill_per_second: 1.0,
        }
    }
}

/// Admission decision for one request against one key
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    Admitted,
    /// Denied; a token becomes available after `retry_after`.
    Throttled { retry_after: Duration },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket limiter keyed by credential
pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
    config: RateLimitConfig,
    clock: SharedClock,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, clock: SharedClock) -> Self {
        Self {
            buckets: DashMap::new(),
            config,
            clock,
        }
    }

    /// Try to take one token from the key's bucket.
    ///
    /// A fresh key starts with a full bucket. Tokens never accumulate past
    /// capacity, however long the key sat idle.
    pub fn try_acquire(&self, key: &str) -> Admission {
        let now = self.clock.now();
        let capacity = f64::from(self.config.capacity);
        let rate = self.config.refill_per_second;

        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket {
                tokens: capacity,
                last_refill: now,
            });

        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * rate).min(capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Admission::Admitted
        } else {
            let deficit = 1.0 - bucket.tokens;
            let retry_after = if rate > 0.0 {
                Duration::from_secs_f64(deficit / rate)
            } else {
                Duration::MAX
            };
            debug!(retry_after_ms = retry_after.as_millis() as u64, "key throttled");
            Admission::Throttled { retry_after }
        }
    }

    /// Drop bucket state for keys no longer in the pool.
    pub fn retain_keys<F: Fn(&str) -> bool>(&self, keep: F) {
        self.buckets.retain(|key, _| keep(key));
    }

    pub fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    fn limiter(capacity: u32, refill: f64) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::new(
            RateLimitConfig {
                capacity,
                refill_per_second: refill,
            },
            clock.clone(),
        );
        (limiter, clock)
    }

    #[test]
    fn test_burst_up_to_capacity_then_throttled() {
        let (limiter, _clock) = limiter(3, 1.0);

        for _ in 0..3 {
            assert!(limiter.try_acquire("k1").is_admitted());
        }
        assert!(matches!(
            limiter.try_acquire("k1"),
            Admission::Throttled { .. }
        ));
    }

    #[test]
    fn test_throttled_reports_time_until_next_token() {
        let (limiter, _clock) = limiter(1, 2.0);
        assert!(limiter.try_acquire("k1").is_admitted());

        match limiter.try_acquire("k1") {
            Admission::Throttled { retry_after } => {
                // 2 tokens/s: next token in 0.5s.
                assert!((retry_after.as_secs_f64() - 0.5).abs() < 1e-6);
            }
            Admission::Admitted => panic!("expected throttle"),
        }
    }

    #[test]
    fn test_refill_admits_after_waiting_one_period() {
        let (limiter, clock) = limiter(1, 2.0);
        assert!(limiter.try_acquire("k1").is_admitted());
        assert!(!limiter.try_acquire("k1").is_admitted());

        clock.advance(Duration::from_millis(500));
        assert!(limiter.try_acquire("k1").is_admitted());
    }

    #[test]
    fn test_tokens_capped_at_capacity() {
        let (limiter, clock) = limiter(2, 1.0);
        assert!(limiter.try_acquire("k1").is_admitted());
        assert!(limiter.try_acquire("k1").is_admitted());

        // A long idle period must not bank more than capacity tokens.
        clock.advance(Duration::from_secs(3600));
        assert!(limiter.try_acquire("k1").is_admitted());
        assert!(limiter.try_acquire("k1").is_admitted());
        assert!(!limiter.try_acquire("k1").is_admitted());
    }

    #[test]
    fn test_buckets_are_per_key() {
        let (limiter, _clock) = limiter(1, 1.0);
        assert!(limiter.try_acquire("k1").is_admitted());
        assert!(limiter.try_acquire("k2").is_admitted());
        assert!(!limiter.try_acquire("k1").is_admitted());
        assert_eq!(limiter.tracked_keys(), 2);
    }

    #[test]
    fn test_retain_drops_stale_buckets() {
        let (limiter, _clock) = limiter(1, 1.0);
        limiter.try_acquire("k1");
        limiter.try_acquire("k2");

        limiter.retain_keys(|k| k == "k2");
        assert_eq!(limiter.tracked_keys(), 1);
    }
}
