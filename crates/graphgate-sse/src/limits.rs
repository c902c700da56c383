//! Per-user SSE connection limits.
//!
//! Two independent caps guard the event stream: a concurrent-connection
//! ceiling per user, and a sliding-log rate limit on new connections.
//! Dropping the returned guard releases the concurrent slot.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(feature = "metrics")]
use metrics::counter;

/// Why a subscription was refused.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectionError {
    #[error("connection limit exceeded: {max} concurrent SSE connections per user")]
    LimitExceeded { max: usize },
    #[error("connection rate exceeded, retry in {retry_after_seconds} seconds")]
    RateLimited { retry_after_seconds: u64 },
}

#[derive(Default, Debug)]
struct LimitState {
    active: HashMap<String, usize>,
    connection_log: HashMap<String, VecDeque<Instant>>,
}

/// Shared connection accounting for all SSE endpoints.
#[derive(Debug)]
pub struct ConnectionLimits {
    state: Mutex<LimitState>,
    max_per_user: usize,
    rate_per_window: usize,
    rate_window: Duration,
}

impl ConnectionLimits {
    pub fn new(max_per_user: usize, rate_per_minute: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(LimitState::default()),
            max_per_user,
            rate_per_window: rate_per_minute,
            rate_window: Duration::from_secs(60),
        })
    }

    /// Claims a connection slot for `user_id`.
    pub fn acquire(self: &Arc<Self>, user_id: &str) -> Result<ConnectionGuard, ConnectionError> {
        let mut state = self.state.lock();

        let active = state.active.get(user_id).copied().unwrap_or(0);
        if active >= self.max_per_user {
            #[cfg(feature = "metrics")]
            counter!("sse_connections_rejected_total", "reason" => "limit").increment(1);
            return Err(ConnectionError::LimitExceeded {
                max: self.max_per_user,
            });
        }

        // Sliding log over the rate window.
        let now = Instant::now();
        let log = state
            .connection_log
            .entry(user_id.to_string())
            .or_default();
        while let Some(&front) = log.front() {
            if now.duration_since(front) >= self.rate_window {
                log.pop_front();
            } else {
                break;
            }
        }
        if log.len() >= self.rate_per_window {
            let retry_after = log
                .front()
                .map(|&oldest| {
                    self.rate_window
                        .saturating_sub(now.duration_since(oldest))
                        .as_secs()
                        .max(1)
                })
                .unwrap_or(1);
            #[cfg(feature = "metrics")]
            counter!("sse_connections_rejected_total", "reason" => "rate").increment(1);
            return Err(ConnectionError::RateLimited {
                retry_after_seconds: retry_after,
            });
        }
        log.push_back(now);

        *state.active.entry(user_id.to_string()).or_insert(0) += 1;

        #[cfg(feature = "metrics")]
        counter!("sse_connections_opened_total").increment(1);

        Ok(ConnectionGuard {
            limits: Arc::clone(self),
            user_id: user_id.to_string(),
        })
    }

    /// Live connections for a user.
    pub fn active_connections(&self, user_id: &str) -> usize {
        self.state.lock().active.get(user_id).copied().unwrap_or(0)
    }

    fn release(&self, user_id: &str) {
        let mut state = self.state.lock();
        if let Some(count) = state.active.get_mut(user_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.active.remove(user_id);
            }
        }

        #[cfg(feature = "metrics")]
        counter!("sse_connections_closed_total").increment(1);
    }
}

/// Holds one connection slot; dropping it releases the slot.
#[derive(Debug)]
pub struct ConnectionGuard {
    limits: Arc<ConnectionLimits>,
    user_id: String,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.limits.release(&self.user_id);
    }
}
