//! Admission control with load shedding.
//!
//! Submissions are rejected before queueing when memory, CPU, or queue fill
//! cross their thresholds. Under sustained pressure the controller sheds
//! below-default-priority work, with hysteresis so shedding does not flap.

use crate::events::AdmissionEvent;
use graphgate_core::config::AdmissionSettings;
use graphgate_core::EventSink;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[cfg(feature = "metrics")]
use metrics::counter;

/// Reason a submission was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Memory,
    Cpu,
    Queue,
    LoadShed,
}

impl RejectReason {
    /// Wire label used in metrics and error payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Memory => "memory",
            RejectReason::Cpu => "cpu",
            RejectReason::Queue => "queue_full",
            RejectReason::LoadShed => "load_shed",
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionDecision {
    Accept,
    Reject {
        reason: RejectReason,
        detail: String,
    },
}

/// Source of system pressure readings.
///
/// Production wires a host probe; tests inject fixed readings.
pub trait SystemPressureSource: Send + Sync {
    /// Memory usage in percent (0..100).
    fn memory_percent(&self) -> f64;
    /// CPU usage in percent (0..100).
    fn cpu_percent(&self) -> f64;
    /// Composite pressure score (0..1), environment-tuned.
    fn pressure_score(&self) -> f64;
}

/// Settable pressure source for tests and single-node deployments.
#[derive(Default)]
pub struct StaticPressure {
    memory: AtomicU64,
    cpu: AtomicU64,
    pressure: AtomicU64,
}

impl StaticPressure {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_memory_percent(&self, value: f64) {
        self.memory.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn set_cpu_percent(&self, value: f64) {
        self.cpu.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn set_pressure_score(&self, value: f64) {
        self.pressure.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl SystemPressureSource for StaticPressure {
    fn memory_percent(&self) -> f64 {
        f64::from_bits(self.memory.load(Ordering::Relaxed))
    }

    fn cpu_percent(&self) -> f64 {
        f64::from_bits(self.cpu.load(Ordering::Relaxed))
    }

    fn pressure_score(&self) -> f64 {
        f64::from_bits(self.pressure.load(Ordering::Relaxed))
    }
}

/// System health as reported alongside queue statistics.
#[derive(Debug, Clone, Serialize)]
pub struct AdmissionHealth {
    pub memory_percent: f64,
    pub cpu_percent: f64,
    pub queue_fill: f64,
    pub pressure_score: f64,
    pub shedding: bool,
    pub healthy: bool,
}

/// Accept/reject gate consulted before any query is queued.
pub struct AdmissionController {
    settings: AdmissionSettings,
    source: Arc<dyn SystemPressureSource>,
    shedding: AtomicBool,
    default_priority: i32,
    events: Mutex<EventSink<AdmissionEvent>>,
    name: String,
}

impl AdmissionController {
    pub fn new(
        settings: AdmissionSettings,
        source: Arc<dyn SystemPressureSource>,
        default_priority: i32,
    ) -> Self {
        Self {
            settings,
            source,
            shedding: AtomicBool::new(false),
            default_priority,
            events: Mutex::new(EventSink::new()),
            name: "admission".to_string(),
        }
    }

    /// Registers a callback for admission decisions.
    pub fn on_event<F>(&self, callback: F)
    where
        F: Fn(&AdmissionEvent) + Send + Sync + 'static,
    {
        self.events.lock().on(callback);
    }

    /// Decides whether a submission may enter the queue.
    pub fn check_admission(
        &self,
        queue_depth: usize,
        max_queue_size: usize,
        _active_queries: usize,
        priority: i32,
    ) -> AdmissionDecision {
        let memory = self.source.memory_percent();
        if memory >= self.settings.memory_threshold {
            return self.reject(
                RejectReason::Memory,
                format!("memory usage {memory:.1}% exceeds threshold"),
            );
        }

        let cpu = self.source.cpu_percent();
        if cpu >= self.settings.cpu_threshold {
            return self.reject(
                RejectReason::Cpu,
                format!("cpu usage {cpu:.1}% exceeds threshold"),
            );
        }

        let queue_fill = queue_fill(queue_depth, max_queue_size);
        if queue_fill >= self.settings.queue_threshold {
            return self.reject(
                RejectReason::Queue,
                format!("queue is {:.0}% full", queue_fill * 100.0),
            );
        }

        if self.settings.load_shedding_enabled {
            let pressure = self.source.pressure_score();
            let shedding = self.update_shedding(pressure);
            if shedding && priority < self.default_priority {
                return self.reject(
                    RejectReason::LoadShed,
                    format!("shedding low-priority load at pressure {pressure:.2}"),
                );
            }
        }

        self.events.lock().dispatch(&AdmissionEvent::Accepted {
            source_name: self.name.clone(),
            timestamp: Instant::now(),
        });

        #[cfg(feature = "metrics")]
        counter!("admission_decisions_total", "decision" => "accept").increment(1);

        AdmissionDecision::Accept
    }

    /// Hysteresis: shedding starts above `shed_start_pressure` and stops only
    /// below `shed_stop_pressure`.
    fn update_shedding(&self, pressure: f64) -> bool {
        let was_shedding = self.shedding.load(Ordering::Relaxed);
        let now_shedding = if was_shedding {
            pressure >= self.settings.shed_stop_pressure
        } else {
            pressure > self.settings.shed_start_pressure
        };

        if now_shedding != was_shedding {
            self.shedding.store(now_shedding, Ordering::Relaxed);

            #[cfg(feature = "tracing")]
            tracing::warn!(pressure, shedding = now_shedding, "load shedding state changed");

            self.events.lock().dispatch(&AdmissionEvent::SheddingChanged {
                source_name: self.name.clone(),
                timestamp: Instant::now(),
                shedding: now_shedding,
                pressure,
            });
        }

        now_shedding
    }

    fn reject(&self, reason: RejectReason, detail: String) -> AdmissionDecision {
        self.events.lock().dispatch(&AdmissionEvent::Rejected {
            source_name: self.name.clone(),
            timestamp: Instant::now(),
            reason,
        });

        #[cfg(feature = "metrics")]
        counter!("admission_decisions_total", "decision" => reason.as_str()).increment(1);

        #[cfg(feature = "tracing")]
        tracing::info!(reason = reason.as_str(), %detail, "admission rejected submission");

        AdmissionDecision::Reject { reason, detail }
    }

    /// Current readings for health reporting.
    pub fn health_status(&self, queue_depth: usize, max_queue_size: usize) -> AdmissionHealth {
        let memory = self.source.memory_percent();
        let cpu = self.source.cpu_percent();
        let fill = queue_fill(queue_depth, max_queue_size);
        AdmissionHealth {
            memory_percent: memory,
            cpu_percent: cpu,
            queue_fill: fill,
            pressure_score: self.source.pressure_score(),
            shedding: self.shedding.load(Ordering::Relaxed),
            healthy: memory < self.settings.memory_threshold
                && cpu < self.settings.cpu_threshold
                && fill < self.settings.queue_threshold,
        }
    }
}

fn queue_fill(depth: usize, max: usize) -> f64 {
    if max == 0 {
        1.0
    } else {
        depth as f64 / max as f64
    }
}
