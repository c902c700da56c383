use graphgate_robustness::CircuitBreakerConfig;
use std::time::Duration;
use tokio::time::sleep;

#[tokio::test]
async fn open_circuit_recovers_after_the_timeout() {
    let manager = CircuitBreakerConfig::builder()
        .failure_threshold(1)
        .recovery_timeout(Duration::from_millis(50))
        .name("recovery-test")
        .build();

    manager.record_failure("kg1", "cypher_query");
    assert!(manager.check("kg1", "cypher_query").is_err());

    sleep(Duration::from_millis(80)).await;

    // Past the window the circuit half-opens and admits a probe.
    assert!(manager.check("kg1", "cypher_query").is_ok());
    assert_eq!(manager.status("kg1", "cypher_query").state, "half_open");

    manager.record_success("kg1", "cypher_query");
    assert_eq!(manager.status("kg1", "cypher_query").state, "closed");
}

#[tokio::test]
async fn failed_probe_reopens_the_circuit() {
    let manager = CircuitBreakerConfig::builder()
        .failure_threshold(2)
        .recovery_timeout(Duration::from_millis(50))
        .name("reopen-test")
        .build();

    manager.record_failure("kg1", "cypher_query");
    manager.record_failure("kg1", "cypher_query");
    sleep(Duration::from_millis(80)).await;

    assert!(manager.check("kg1", "cypher_query").is_ok());
    manager.record_failure("kg1", "cypher_query");

    let err = manager.check("kg1", "cypher_query").unwrap_err();
    assert!(err.retry_after_seconds() >= 30);
}

#[tokio::test]
async fn half_open_admits_a_bounded_number_of_probes() {
    let manager = CircuitBreakerConfig::builder()
        .failure_threshold(1)
        .recovery_timeout(Duration::from_millis(10))
        .half_open_max_calls(3)
        .name("probe-budget-test")
        .build();

    manager.record_failure("kg1", "cypher_query");
    sleep(Duration::from_millis(30)).await;

    for _ in 0..3 {
        assert!(manager.check("kg1", "cypher_query").is_ok());
    }
    assert!(manager.check("kg1", "cypher_query").is_err());
}

#[tokio::test]
async fn full_cycle_open_recover_close() {
    let manager = CircuitBreakerConfig::builder()
        .failure_threshold(3)
        .recovery_timeout(Duration::from_millis(60))
        .name("cycle-test")
        .build();

    // Repeated engine failures trip the circuit.
    for _ in 0..3 {
        manager.record_failure("kg1", "cypher_query");
    }
    assert!(manager.check("kg1", "cypher_query").is_err());

    // Still open inside the window.
    sleep(Duration::from_millis(20)).await;
    assert!(manager.check("kg1", "cypher_query").is_err());

    // One successful probe closes it for good.
    sleep(Duration::from_millis(60)).await;
    assert!(manager.check("kg1", "cypher_query").is_ok());
    manager.record_success("kg1", "cypher_query");
    assert!(manager.check("kg1", "cypher_query").is_ok());
    assert_eq!(manager.status("kg1", "cypher_query").failure_count, 0);
}
