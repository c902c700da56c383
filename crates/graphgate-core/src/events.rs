//! Observability hooks for gateway subsystems.
//!
//! The circuit breaker and admission controller report lifecycle events
//! through an [`EventSink`]: a plain list of callbacks registered at
//! configuration time. A sink is deliberately minimal; subsystems that need
//! richer telemetry use `tracing` and `metrics` directly.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Implemented by event types dispatched through an [`EventSink`].
pub trait GatewayEvent: fmt::Debug {
    /// Short machine-readable kind, e.g. `"state_transition"`.
    fn event_type(&self) -> &'static str;

    /// Name of the component instance that produced the event.
    fn source_name(&self) -> &str;
}

type Callback<E> = Box<dyn Fn(&E) + Send + Sync>;

/// An ordered list of event callbacks.
///
/// Dispatch must never affect the emitting subsystem: a panicking callback
/// is caught, accounted for, and the remaining callbacks still run.
pub struct EventSink<E> {
    callbacks: Vec<Callback<E>>,
}

impl<E: GatewayEvent> EventSink<E> {
    pub fn new() -> Self {
        Self {
            callbacks: Vec::new(),
        }
    }

    /// Registers a callback for every dispatched event.
    pub fn on<F>(&mut self, callback: F)
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    /// Dispatches an event to every registered callback.
    pub fn dispatch(&self, event: &E) {
        for callback in &self.callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    source = event.source_name(),
                    event_type = event.event_type(),
                    "event callback panicked"
                );

                #[cfg(feature = "metrics")]
                metrics::counter!(
                    "gateway_event_callback_panics_total",
                    "source" => event.source_name().to_string(),
                    "event_type" => event.event_type()
                )
                .increment(1);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }
}

impl<E: GatewayEvent> Default for EventSink<E> {
    fn default() -> Self {
        Self::new()
    }
}
