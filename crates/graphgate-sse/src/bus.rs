//! The operation event bus.
//!
//! Events are appended to a bounded per-operation log in the KV store (so
//! late subscribers replay history) and fanned out to live subscribers over
//! broadcast channels. Publishing never fails the caller: after a run of
//! consecutive persistence failures the publisher breaker opens and emits
//! become no-ops until a publish succeeds again.

use crate::events::{EventType, OperationEvent};
use crate::limits::{ConnectionError, ConnectionGuard, ConnectionLimits};
use graphgate_core::config::SseSettings;
use graphgate_core::KvStore;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

#[cfg(feature = "metrics")]
use metrics::counter;

const LIVE_CHANNEL_CAPACITY: usize = 256;
/// An open publisher breaker admits one probe publish per this interval.
const PUBLISHER_PROBE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

fn events_key(operation_id: &str) -> String {
    format!("operation_events:{operation_id}")
}

fn meta_key(operation_id: &str) -> String {
    format!("operation_meta:{operation_id}")
}

/// Registration record for a monitored operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationHandle {
    pub operation_id: String,
    pub operation_type: String,
    pub user_id: String,
    pub graph_id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl OperationHandle {
    /// Path of the unified monitoring endpoint for this operation.
    pub fn stream_path(&self) -> String {
        format!("/v1/operations/{}/stream", self.operation_id)
    }
}

/// A granted subscription: persisted history plus a live receiver. The guard
/// holds the user's connection slot for the stream's lifetime.
pub struct Subscription {
    pub replay: Vec<OperationEvent>,
    pub live: broadcast::Receiver<OperationEvent>,
    pub guard: ConnectionGuard,
}

/// Publisher/subscriber hub for operation events.
pub struct OperationBus {
    kv: Arc<dyn KvStore>,
    settings: SseSettings,
    limits: Arc<ConnectionLimits>,
    channels: Mutex<HashMap<String, broadcast::Sender<OperationEvent>>>,
    consecutive_failures: AtomicU32,
    last_publish_failure: Mutex<Option<std::time::Instant>>,
}

impl OperationBus {
    pub fn new(kv: Arc<dyn KvStore>, settings: SseSettings) -> Arc<Self> {
        let limits = ConnectionLimits::new(
            settings.max_connections_per_user,
            settings.connection_rate_per_minute,
        );
        Arc::new(Self {
            kv,
            settings,
            limits,
            channels: Mutex::new(HashMap::new()),
            consecutive_failures: AtomicU32::new(0),
            last_publish_failure: Mutex::new(None),
        })
    }

    pub fn limits(&self) -> &Arc<ConnectionLimits> {
        &self.limits
    }

    /// Registers an operation for monitoring and returns its handle.
    pub async fn create_operation(
        &self,
        operation_type: &str,
        user_id: &str,
        graph_id: &str,
        operation_id: Option<String>,
    ) -> OperationHandle {
        let handle = OperationHandle {
            operation_id: operation_id
                .unwrap_or_else(|| format!("op_{}", uuid::Uuid::new_v4().simple())),
            operation_type: operation_type.to_string(),
            user_id: user_id.to_string(),
            graph_id: graph_id.to_string(),
            created_at: chrono::Utc::now(),
        };

        if let Ok(raw) = serde_json::to_string(&handle) {
            let _ = self
                .kv
                .set(
                    &meta_key(&handle.operation_id),
                    raw,
                    Some(self.settings.event_retention),
                )
                .await;
        }
        handle
    }

    /// Looks up a registered operation.
    pub async fn operation(&self, operation_id: &str) -> Option<OperationHandle> {
        let raw = self.kv.get(&meta_key(operation_id)).await.ok()??;
        serde_json::from_str(&raw).ok()
    }

    /// Whether the publisher breaker is currently open.
    pub fn publisher_open(&self) -> bool {
        self.consecutive_failures.load(Ordering::Relaxed) >= self.settings.max_publish_failures
    }

    /// Appends an event to the operation's log and fans it out to live
    /// subscribers. Fire-and-forget: the originating operation continues
    /// regardless of what happens here.
    pub async fn emit(&self, operation_id: &str, event_type: EventType, payload: Value) {
        if !self.settings.enabled {
            return;
        }
        if self.publisher_open() {
            // One probe per interval keeps recovery possible; everything else
            // is dropped while the breaker is open.
            let probe_due = self
                .last_publish_failure
                .lock()
                .is_some_and(|at| at.elapsed() >= PUBLISHER_PROBE_INTERVAL);
            if !probe_due {
                tracing::warn!(
                    operation_id,
                    failures = self.consecutive_failures.load(Ordering::Relaxed),
                    "sse publisher breaker open, dropping event"
                );
                return;
            }
        }

        let event = OperationEvent::new(operation_id, event_type, payload);

        match self.persist(&event).await {
            Ok(()) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                *self.last_publish_failure.lock() = None;
                #[cfg(feature = "metrics")]
                counter!("sse_events_emitted_total", "event_type" => event_type.as_str())
                    .increment(1);
            }
            Err(err) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                *self.last_publish_failure.lock() = Some(std::time::Instant::now());
                tracing::warn!(
                    operation_id,
                    failures,
                    max = self.settings.max_publish_failures,
                    error = %err,
                    "failed to persist sse event, operation continues"
                );
                #[cfg(feature = "metrics")]
                {
                    counter!("sse_events_failed_total").increment(1);
                    if failures == self.settings.max_publish_failures {
                        counter!("sse_circuit_breaker_opens_total").increment(1);
                    }
                }
            }
        }

        // Live fan-out is best-effort; no receiver just means nobody watching.
        let sender = self.channels.lock().get(operation_id).cloned();
        if let Some(sender) = sender {
            let _ = sender.send(event);
        }
    }

    async fn persist(&self, event: &OperationEvent) -> Result<(), graphgate_core::KvError> {
        let key = events_key(&event.operation_id);
        let mut log: Vec<OperationEvent> = match self.kv.get(&key).await? {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            None => Vec::new(),
        };
        log.push(event.clone());
        if log.len() > self.settings.max_events_per_operation {
            let excess = log.len() - self.settings.max_events_per_operation;
            log.drain(..excess);
        }
        let raw = serde_json::to_string(&log)
            .map_err(|e| graphgate_core::KvError::Unavailable(e.to_string()))?;
        self.kv
            .set(&key, raw, Some(self.settings.event_retention))
            .await
    }

    /// Subscribes to an operation's events: persisted history first, then
    /// live delivery. Enforces the per-user connection caps.
    pub async fn subscribe(
        &self,
        operation_id: &str,
        user_id: &str,
    ) -> Result<Subscription, ConnectionError> {
        let guard = self.limits.acquire(user_id)?;

        let replay: Vec<OperationEvent> = match self.kv.get(&events_key(operation_id)).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_default(),
            _ => Vec::new(),
        };

        let live = {
            let mut channels = self.channels.lock();
            channels
                .entry(operation_id.to_string())
                .or_insert_with(|| broadcast::channel(LIVE_CHANNEL_CAPACITY).0)
                .subscribe()
        };

        Ok(Subscription {
            replay,
            live,
            guard,
        })
    }

    /// Drops the live channel for an operation once it is finished.
    pub fn close_operation(&self, operation_id: &str) {
        self.channels.lock().remove(operation_id);
    }
}
