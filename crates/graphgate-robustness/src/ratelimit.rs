//! Keyed sliding-log rate limiting.
//!
//! Shared repositories price their reads at zero, so request rate is the
//! only control on them. The limiter keeps a timestamp log per key (the
//! caller picks the key shape, e.g. `user:repository`) and rejects once the
//! window holds the configured number of entries, reporting when the oldest
//! entry will expire.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

#[cfg(feature = "metrics")]
use metrics::counter;

/// Rejection carrying the wait until a slot frees up.
#[derive(Debug, Clone, thiserror::Error)]
#[error("rate limit exceeded, retry in {retry_after_seconds} seconds")]
pub struct RateLimitExceeded {
    pub retry_after_seconds: u64,
}

/// Sliding-log rate limiter over caller-chosen keys.
pub struct SlidingLogRateLimiter {
    limit_per_window: usize,
    window: Duration,
    log: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingLogRateLimiter {
    pub fn new(limit_per_window: usize, window: Duration) -> Self {
        Self {
            limit_per_window,
            window,
            log: Mutex::new(HashMap::new()),
        }
    }

    /// Limiter over a one-minute window.
    pub fn per_minute(limit: usize) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    /// Claims a slot for `key`, or reports how long until one frees up.
    pub fn try_acquire(&self, key: &str) -> Result<(), RateLimitExceeded> {
        let now = Instant::now();
        let mut log = self.log.lock();
        let entries = log.entry(key.to_string()).or_default();

        while let Some(&oldest) = entries.front() {
            if now.duration_since(oldest) >= self.window {
                entries.pop_front();
            } else {
                break;
            }
        }

        if entries.len() >= self.limit_per_window {
            let retry_after = entries
                .front()
                .map(|&oldest| {
                    self.window
                        .saturating_sub(now.duration_since(oldest))
                        .as_secs()
                        .max(1)
                })
                .unwrap_or(1);

            #[cfg(feature = "metrics")]
            counter!("ratelimiter_calls_total", "outcome" => "rejected").increment(1);

            return Err(RateLimitExceeded {
                retry_after_seconds: retry_after,
            });
        }

        entries.push_back(now);

        #[cfg(feature = "metrics")]
        counter!("ratelimiter_calls_total", "outcome" => "permitted").increment(1);

        Ok(())
    }

    /// Remaining slots for `key` in the current window.
    pub fn available(&self, key: &str) -> usize {
        let now = Instant::now();
        let log = self.log.lock();
        let used = log
            .get(key)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|&&at| now.duration_since(at) < self.window)
                    .count()
            })
            .unwrap_or(0);
        self.limit_per_window.saturating_sub(used)
    }
}
