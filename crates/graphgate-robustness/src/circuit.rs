//! Circuit breaker manager keyed by `(graph, operation)`.
//!
//! Unlike a per-service breaker, the gateway tracks one circuit per target
//! graph and operation so a single misbehaving tenant database cannot take
//! down the whole gateway, and a healthy graph is never penalized for its
//! neighbor's failures.

use crate::events::CircuitBreakerEvent;
use graphgate_core::EventSink;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[cfg(feature = "metrics")]
use metrics::counter;

/// Error returned when a circuit rejects a call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CircuitError {
    /// The circuit for this key is open; retry after the given seconds.
    #[error("circuit breaker open for {operation} on {graph_id}")]
    Open {
        graph_id: String,
        operation: String,
        retry_after_seconds: u64,
    },
}

impl CircuitError {
    pub fn retry_after_seconds(&self) -> u64 {
        match self {
            CircuitError::Open {
                retry_after_seconds,
                ..
            } => *retry_after_seconds,
        }
    }
}

/// Configuration for the circuit breaker manager.
pub struct CircuitBreakerConfig {
    pub(crate) failure_threshold: u32,
    pub(crate) recovery_timeout: Duration,
    pub(crate) half_open_max_calls: u32,
    pub(crate) name: String,
    pub(crate) events: EventSink<CircuitBreakerEvent>,
}

impl CircuitBreakerConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }
}

/// Builder for configuring and constructing a circuit breaker manager.
pub struct CircuitBreakerConfigBuilder {
    failure_threshold: u32,
    recovery_timeout: Duration,
    half_open_max_calls: u32,
    name: String,
    events: EventSink<CircuitBreakerEvent>,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 3,
            name: String::from("<unnamed>"),
            events: EventSink::new(),
        }
    }

    /// Consecutive failures before a circuit opens.
    ///
    /// Default: 5
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// How long an open circuit rejects calls before probing recovery.
    ///
    /// Default: 60 seconds
    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    /// Probe calls permitted while half-open.
    ///
    /// Default: 3
    pub fn half_open_max_calls(mut self, calls: u32) -> Self {
        self.half_open_max_calls = calls;
        self
    }

    /// Human-readable name for observability.
    pub fn name<N: Into<String>>(mut self, name: N) -> Self {
        self.name = name.into();
        self
    }

    /// Register a callback for open/close transitions. The flag is true when
    /// the circuit opened.
    pub fn on_state_transition<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, bool) + Send + Sync + 'static,
    {
        self.events.on(move |event: &CircuitBreakerEvent| {
            if let CircuitBreakerEvent::StateTransition { key, opened, .. } = event {
                f(key, *opened);
            }
        });
        self
    }

    /// Register a callback for rejected calls.
    pub fn on_call_rejected<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.events.on(move |event: &CircuitBreakerEvent| {
            if let CircuitBreakerEvent::CallRejected { key, .. } = event {
                f(key);
            }
        });
        self
    }

    /// Builds the manager.
    pub fn build(self) -> CircuitBreakerManager {
        CircuitBreakerManager::new(CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: self.recovery_timeout,
            half_open_max_calls: self.half_open_max_calls,
            name: self.name,
            events: self.events,
        })
    }
}

impl Default for CircuitBreakerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct Circuit {
    failure_count: u32,
    last_failure_at: Option<Instant>,
    last_success_at: Option<Instant>,
    is_open: bool,
    half_open: bool,
    half_open_calls: u32,
}

/// Read-only snapshot of one circuit for observability.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CircuitSnapshot {
    pub key: String,
    pub state: &'static str,
    pub is_open: bool,
    pub failure_count: u32,
    pub seconds_since_last_failure: Option<f64>,
    pub seconds_since_last_success: Option<f64>,
}

/// Circuit breaker manager for graph operations.
pub struct CircuitBreakerManager {
    config: CircuitBreakerConfig,
    circuits: Mutex<HashMap<String, Circuit>>,
}

impl CircuitBreakerManager {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    /// Manager with the default production thresholds.
    pub fn with_defaults() -> Self {
        CircuitBreakerConfig::builder().name("graph-operations").build()
    }

    fn key(graph_id: &str, operation: &str) -> String {
        format!("{graph_id}:{operation}")
    }

    /// Checks whether a call may proceed.
    ///
    /// An open circuit inside its recovery window rejects with a
    /// `Retry-After` of at least 30 seconds. Past the window the circuit
    /// moves to half-open and admits a bounded number of probes.
    pub fn check(&self, graph_id: &str, operation: &str) -> Result<(), CircuitError> {
        let key = Self::key(graph_id, operation);
        let mut circuits = self.circuits.lock();
        let circuit = circuits.entry(key.clone()).or_default();

        if circuit.is_open {
            let elapsed = circuit
                .last_failure_at
                .map(|at| at.elapsed())
                .unwrap_or(Duration::ZERO);

            if elapsed >= self.config.recovery_timeout {
                circuit.is_open = false;
                circuit.half_open = true;
                circuit.half_open_calls = 0;
                circuit.failure_count = 0;
                drop(circuits);

                #[cfg(feature = "tracing")]
                tracing::info!(circuit = %key, "circuit moving to half-open state");

                self.emit_transition(&key, false);
                return self.check_half_open(graph_id, operation);
            }

            let retry_after = self
                .config
                .recovery_timeout
                .saturating_sub(elapsed)
                .as_secs()
                .max(30);
            drop(circuits);
            self.reject(&key, retry_after);
            return Err(CircuitError::Open {
                graph_id: graph_id.to_string(),
                operation: operation.to_string(),
                retry_after_seconds: retry_after,
            });
        }

        if circuit.half_open {
            drop(circuits);
            return self.check_half_open(graph_id, operation);
        }

        Ok(())
    }

    fn check_half_open(&self, graph_id: &str, operation: &str) -> Result<(), CircuitError> {
        let key = Self::key(graph_id, operation);
        let mut circuits = self.circuits.lock();
        let circuit = circuits.entry(key.clone()).or_default();

        if circuit.half_open_calls < self.config.half_open_max_calls {
            circuit.half_open_calls += 1;
            return Ok(());
        }
        drop(circuits);

        self.reject(&key, 30);
        Err(CircuitError::Open {
            graph_id: graph_id.to_string(),
            operation: operation.to_string(),
            retry_after_seconds: 30,
        })
    }

    /// Records a successful operation: failure count resets and an open or
    /// half-open circuit closes.
    pub fn record_success(&self, graph_id: &str, operation: &str) {
        let key = Self::key(graph_id, operation);
        let was_open;
        {
            let mut circuits = self.circuits.lock();
            let circuit = circuits.entry(key.clone()).or_default();
            was_open = circuit.is_open || circuit.half_open;
            circuit.failure_count = 0;
            circuit.last_success_at = Some(Instant::now());
            circuit.is_open = false;
            circuit.half_open = false;
            circuit.half_open_calls = 0;
        }

        if was_open {
            #[cfg(feature = "tracing")]
            tracing::info!(circuit = %key, "circuit closed after successful operation");
            self.emit_transition(&key, false);
        }

        self.config
            .events
            .dispatch(&CircuitBreakerEvent::SuccessRecorded {
                source_name: self.config.name.clone(),
                key,
                timestamp: Instant::now(),
            });

        #[cfg(feature = "metrics")]
        counter!("circuitbreaker_calls_total", "circuitbreaker" => self.config.name.clone(), "outcome" => "success")
            .increment(1);
    }

    /// Records a failed operation, opening the circuit at the threshold.
    pub fn record_failure(&self, graph_id: &str, operation: &str) {
        let key = Self::key(graph_id, operation);
        let (failure_count, opened);
        {
            let mut circuits = self.circuits.lock();
            let circuit = circuits.entry(key.clone()).or_default();
            // A failed half-open probe reopens immediately.
            if circuit.half_open {
                circuit.failure_count = self.config.failure_threshold;
            } else {
                circuit.failure_count += 1;
            }
            circuit.last_failure_at = Some(Instant::now());
            circuit.half_open = false;
            circuit.half_open_calls = 0;
            opened = !circuit.is_open && circuit.failure_count >= self.config.failure_threshold;
            if opened {
                circuit.is_open = true;
            }
            failure_count = circuit.failure_count;
        }

        if opened {
            #[cfg(feature = "tracing")]
            tracing::warn!(circuit = %key, failures = failure_count, "circuit opened");
            self.emit_transition(&key, true);

            #[cfg(feature = "metrics")]
            counter!("circuitbreaker_opens_total", "circuitbreaker" => self.config.name.clone())
                .increment(1);
        }

        self.config
            .events
            .dispatch(&CircuitBreakerEvent::FailureRecorded {
                source_name: self.config.name.clone(),
                key,
                timestamp: Instant::now(),
                failure_count,
            });

        #[cfg(feature = "metrics")]
        counter!("circuitbreaker_calls_total", "circuitbreaker" => self.config.name.clone(), "outcome" => "failure")
            .increment(1);
    }

    /// Snapshot of one circuit.
    pub fn status(&self, graph_id: &str, operation: &str) -> CircuitSnapshot {
        let key = Self::key(graph_id, operation);
        let circuits = self.circuits.lock();
        let circuit = circuits.get(&key);
        snapshot(&key, circuit.unwrap_or(&Circuit::default()))
    }

    /// Snapshots of every tracked circuit.
    pub fn all_statuses(&self) -> Vec<CircuitSnapshot> {
        let circuits = self.circuits.lock();
        let mut statuses: Vec<CircuitSnapshot> = circuits
            .iter()
            .map(|(key, circuit)| snapshot(key, circuit))
            .collect();
        statuses.sort_by(|a, b| a.key.cmp(&b.key));
        statuses
    }

    fn emit_transition(&self, key: &str, opened: bool) {
        self.config
            .events
            .dispatch(&CircuitBreakerEvent::StateTransition {
                source_name: self.config.name.clone(),
                key: key.to_string(),
                timestamp: Instant::now(),
                opened,
            });
    }

    fn reject(&self, key: &str, retry_after_seconds: u64) {
        self.config
            .events
            .dispatch(&CircuitBreakerEvent::CallRejected {
                source_name: self.config.name.clone(),
                key: key.to_string(),
                timestamp: Instant::now(),
                retry_after_seconds,
            });

        #[cfg(feature = "metrics")]
        counter!("circuitbreaker_calls_rejected_total", "circuitbreaker" => self.config.name.clone())
            .increment(1);
    }
}

fn snapshot(key: &str, circuit: &Circuit) -> CircuitSnapshot {
    let state = if circuit.is_open {
        "open"
    } else if circuit.half_open {
        "half_open"
    } else {
        "closed"
    };
    CircuitSnapshot {
        key: key.to_string(),
        state,
        is_open: circuit.is_open,
        failure_count: circuit.failure_count,
        seconds_since_last_failure: circuit.last_failure_at.map(|at| at.elapsed().as_secs_f64()),
        seconds_since_last_success: circuit.last_success_at.map(|at| at.elapsed().as_secs_f64()),
    }
}
