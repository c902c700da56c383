use graphgate_core::config::AdmissionSettings;
use graphgate_robustness::{
    AdmissionController, AdmissionDecision, RejectReason, StaticPressure,
};
use std::sync::Arc;

fn controller(source: Arc<StaticPressure>) -> AdmissionController {
    AdmissionController::new(AdmissionSettings::default(), source, 5)
}

#[test]
fn rejection_order_is_memory_cpu_queue() {
    let source = StaticPressure::new();
    source.set_memory_percent(95.0);
    source.set_cpu_percent(99.0);
    let admission = controller(Arc::clone(&source));

    // Memory wins when several thresholds are breached.
    match admission.check_admission(950, 1000, 10, 5) {
        AdmissionDecision::Reject { reason, .. } => assert_eq!(reason, RejectReason::Memory),
        other => panic!("expected memory rejection, got {other:?}"),
    }

    source.set_memory_percent(10.0);
    match admission.check_admission(950, 1000, 10, 5) {
        AdmissionDecision::Reject { reason, .. } => assert_eq!(reason, RejectReason::Cpu),
        other => panic!("expected cpu rejection, got {other:?}"),
    }

    source.set_cpu_percent(10.0);
    match admission.check_admission(950, 1000, 10, 5) {
        AdmissionDecision::Reject { reason, .. } => assert_eq!(reason, RejectReason::Queue),
        other => panic!("expected queue rejection, got {other:?}"),
    }
}

#[test]
fn shedding_hysteresis_is_sticky_between_thresholds() {
    let source = StaticPressure::new();
    let admission = controller(Arc::clone(&source));

    // Below start pressure: low priority passes.
    source.set_pressure_score(0.75);
    assert_eq!(
        admission.check_admission(0, 1000, 0, 1),
        AdmissionDecision::Accept
    );

    // Crossing start pressure begins shedding.
    source.set_pressure_score(0.85);
    assert!(matches!(
        admission.check_admission(0, 1000, 0, 1),
        AdmissionDecision::Reject {
            reason: RejectReason::LoadShed,
            ..
        }
    ));

    // Dropping to between stop and start keeps shedding (hysteresis).
    source.set_pressure_score(0.7);
    assert!(matches!(
        admission.check_admission(0, 1000, 0, 1),
        AdmissionDecision::Reject { .. }
    ));

    // Below stop pressure, shedding ends.
    source.set_pressure_score(0.55);
    assert_eq!(
        admission.check_admission(0, 1000, 0, 1),
        AdmissionDecision::Accept
    );
}

#[test]
fn shedding_never_rejects_default_or_boosted_priority() {
    let source = StaticPressure::new();
    source.set_pressure_score(0.99);
    let admission = controller(Arc::clone(&source));

    assert_eq!(
        admission.check_admission(0, 1000, 0, 5),
        AdmissionDecision::Accept
    );
    assert_eq!(
        admission.check_admission(0, 1000, 0, 8),
        AdmissionDecision::Accept
    );
}

#[test]
fn disabled_shedding_ignores_pressure() {
    let source = StaticPressure::new();
    source.set_pressure_score(0.99);
    let settings = AdmissionSettings {
        load_shedding_enabled: false,
        ..AdmissionSettings::default()
    };
    let admission = AdmissionController::new(settings, source, 5);
    assert_eq!(
        admission.check_admission(0, 1000, 0, 1),
        AdmissionDecision::Accept
    );
}

#[test]
fn health_status_reports_readings() {
    let source = StaticPressure::new();
    source.set_memory_percent(40.0);
    source.set_cpu_percent(30.0);
    let admission = controller(Arc::clone(&source));

    let health = admission.health_status(100, 1000);
    assert!(health.healthy);
    assert_eq!(health.memory_percent, 40.0);
    assert_eq!(health.queue_fill, 0.1);

    source.set_memory_percent(95.0);
    assert!(!admission.health_status(100, 1000).healthy);
}
