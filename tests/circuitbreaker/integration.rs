use graphgate_robustness::CircuitBreakerConfig;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn threshold_failures_open_the_circuit() {
    let manager = CircuitBreakerConfig::builder()
        .failure_threshold(5)
        .recovery_timeout(Duration::from_secs(60))
        .name("threshold-test")
        .build();

    for _ in 0..4 {
        manager.record_failure("kg1", "cypher_query");
        assert!(manager.check("kg1", "cypher_query").is_ok());
    }

    manager.record_failure("kg1", "cypher_query");
    let err = manager.check("kg1", "cypher_query").unwrap_err();
    assert!(err.retry_after_seconds() >= 30);
    assert!(err.retry_after_seconds() <= 60);
}

#[test]
fn graph_and_operation_keys_are_independent() {
    let manager = CircuitBreakerConfig::builder()
        .failure_threshold(2)
        .name("isolation-test")
        .build();

    manager.record_failure("kg1", "cypher_query");
    manager.record_failure("kg1", "cypher_query");

    assert!(manager.check("kg1", "cypher_query").is_err());
    assert!(manager.check("kg1", "schema_info").is_ok());
    assert!(manager.check("kg2", "cypher_query").is_ok());
}

#[test]
fn success_closes_an_open_circuit_and_resets_the_counter() {
    let manager = CircuitBreakerConfig::builder()
        .failure_threshold(2)
        .name("close-test")
        .build();

    manager.record_failure("kg1", "cypher_query");
    manager.record_failure("kg1", "cypher_query");
    assert!(manager.status("kg1", "cypher_query").is_open);

    manager.record_success("kg1", "cypher_query");
    let status = manager.status("kg1", "cypher_query");
    assert!(!status.is_open);
    assert_eq!(status.failure_count, 0);
    assert!(manager.check("kg1", "cypher_query").is_ok());
}

#[test]
fn callback_panics_never_break_the_breaker() {
    let manager = CircuitBreakerConfig::builder()
        .failure_threshold(1)
        .name("panic-test")
        .on_state_transition(|_, _| panic!("listener boom"))
        .build();

    manager.record_failure("kg1", "cypher_query");
    assert!(manager.status("kg1", "cypher_query").is_open);
    manager.record_success("kg1", "cypher_query");
    assert!(!manager.status("kg1", "cypher_query").is_open);
}

#[test]
fn transition_callbacks_observe_open_and_close() {
    let opens = Arc::new(AtomicUsize::new(0));
    let closes = Arc::new(AtomicUsize::new(0));
    let opens_clone = Arc::clone(&opens);
    let closes_clone = Arc::clone(&closes);

    let manager = CircuitBreakerConfig::builder()
        .failure_threshold(1)
        .name("listener-test")
        .on_state_transition(move |_, opened| {
            if opened {
                opens_clone.fetch_add(1, Ordering::SeqCst);
            } else {
                closes_clone.fetch_add(1, Ordering::SeqCst);
            }
        })
        .build();

    manager.record_failure("kg1", "cypher_query");
    manager.record_success("kg1", "cypher_query");

    assert_eq!(opens.load(Ordering::SeqCst), 1);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[test]
fn all_statuses_snapshot_is_sorted_and_readonly() {
    let manager = CircuitBreakerConfig::builder()
        .failure_threshold(1)
        .name("snapshot-test")
        .build();

    manager.record_failure("kgb", "cypher_query");
    manager.record_success("kga", "cypher_query");

    let statuses = manager.all_statuses();
    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses[0].key, "kga:cypher_query");
    assert_eq!(statuses[1].key, "kgb:cypher_query");
    assert!(statuses[1].is_open);
}
