use graphgate_robustness::SlidingLogRateLimiter;
use std::time::Duration;

#[test]
fn burst_is_rejected_with_a_retry_hint() {
    let limiter = SlidingLogRateLimiter::per_minute(5);

    for _ in 0..5 {
        assert!(limiter.try_acquire("u1:sec").is_ok());
    }

    let err = limiter.try_acquire("u1:sec").unwrap_err();
    assert!((1..=60).contains(&err.retry_after_seconds));
}

#[test]
fn each_user_repository_pair_has_its_own_budget() {
    let limiter = SlidingLogRateLimiter::per_minute(2);

    assert!(limiter.try_acquire("u1:sec").is_ok());
    assert!(limiter.try_acquire("u1:sec").is_ok());
    assert!(limiter.try_acquire("u1:sec").is_err());

    // A different repository and a different user are untouched.
    assert!(limiter.try_acquire("u1:economic").is_ok());
    assert!(limiter.try_acquire("u2:sec").is_ok());
    assert_eq!(limiter.available("u1:sec"), 0);
    assert_eq!(limiter.available("u2:sec"), 1);
}

#[tokio::test]
async fn expired_entries_free_slots() {
    let limiter = SlidingLogRateLimiter::new(2, Duration::from_millis(60));

    assert!(limiter.try_acquire("u1:sec").is_ok());
    assert!(limiter.try_acquire("u1:sec").is_ok());
    assert!(limiter.try_acquire("u1:sec").is_err());

    tokio::time::sleep(Duration::from_millis(90)).await;
    assert!(limiter.try_acquire("u1:sec").is_ok());
}
