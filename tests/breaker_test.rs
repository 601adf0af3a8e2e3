//! Circuit breaker behavior across handles sharing one state file.

use beads_dolt::breaker::{breaker_file_path, BreakerRegistry};
use beads_dolt::{BreakerConfig, BreakerState, CircuitBreaker, CircuitState, Error};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

fn fast_config() -> BreakerConfig {
    BreakerConfig {
        failure_threshold: 5,
        failure_window: Duration::from_secs(60),
        cooldown: Duration::from_millis(100),
        probe_timeout: Duration::from_secs(30),
    }
}

fn refused() -> Error {
    Error::Connection("connection refused".to_string())
}

#[tokio::test]
async fn five_failures_open_then_probe_closes() {
    let dir = TempDir::new().unwrap();
    let registry = BreakerRegistry::with_dir(dir.path(), fast_config());
    let breaker = registry.for_port(13400);
    let attempts = AtomicUsize::new(0);

    for _ in 0..5 {
        let result: Result<(), Error> = breaker
            .call(async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(refused())
            })
            .await;
        assert!(matches!(result, Err(Error::Connection(_))));
    }
    assert_eq!(breaker.state().state, BreakerState::Open);

    // Sixth call never reaches the server
    let result: Result<(), Error> = breaker
        .call(async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;
    assert!(matches!(result, Err(Error::CircuitOpen { port: 13400, .. })));
    assert_eq!(attempts.load(Ordering::SeqCst), 5);

    tokio::time::sleep(Duration::from_millis(150)).await;

    let result = breaker
        .call(async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Ok(42)
        })
        .await;
    assert_eq!(result.unwrap(), 42);
    assert_eq!(breaker.state().state, BreakerState::Closed);
    assert!(!breaker.path().exists(), "closed breaker leaves no file");
}

#[test]
fn trip_is_visible_to_other_processes_handles() {
    let dir = TempDir::new().unwrap();
    let path = breaker_file_path(dir.path(), 13401);
    let ours = CircuitBreaker::new(13401, &path, BreakerConfig::default());
    let theirs = CircuitBreaker::new(13401, &path, BreakerConfig::default());

    for _ in 0..BreakerConfig::default().failure_threshold {
        ours.record_failure();
    }

    assert!(!theirs.allow());
    let err = theirs.check().unwrap_err();
    assert!(err.to_string().contains("circuit open"));

    theirs.reset().unwrap();
    assert!(ours.allow());
}

#[test]
fn only_one_caller_probes_after_cooldown() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("circuit.json");
    let config = BreakerConfig::default();
    let a = CircuitBreaker::new(13402, &path, config);
    let b = CircuitBreaker::new(13402, &path, config);

    let t0 = Utc::now();
    for i in 0..config.failure_threshold {
        a.record_failure_at(t0 + ChronoDuration::milliseconds(i as i64));
    }
    let after_cooldown = t0 + ChronoDuration::seconds(10);

    assert!(a.allow_at(after_cooldown));
    assert_eq!(b.state().state, BreakerState::HalfOpen);
    assert!(!b.allow_at(after_cooldown));
    assert!(!a.allow_at(after_cooldown + ChronoDuration::seconds(1)));

    b.record_failure_at(after_cooldown + ChronoDuration::seconds(2));
    assert_eq!(a.state().state, BreakerState::Open);
}

#[tokio::test]
async fn query_errors_count_as_reachable() {
    let dir = TempDir::new().unwrap();
    let breaker = CircuitBreaker::new(13403, dir.path().join("c.json"), fast_config());
    for _ in 0..4 {
        breaker.record_failure();
    }

    let result: Result<(), Error> = breaker
        .call(async { Err(Error::Validation("title is required".into())) })
        .await;
    assert!(matches!(result, Err(Error::Validation(_))));
    assert_eq!(breaker.state().failures, 0);
}

#[derive(Debug, Clone)]
enum Op {
    Failure(i64),
    Success,
    Allow(i64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0i64..20_000).prop_map(Op::Failure),
        1 => Just(Op::Success),
        3 => (0i64..20_000).prop_map(Op::Allow),
    ]
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

proptest! {
    #[test]
    fn breaker_state_stays_consistent(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let dir = TempDir::new().unwrap();
        let config = BreakerConfig::default();
        let breaker = CircuitBreaker::new(13404, dir.path().join("c.json"), config);
        let mut now = base_time();

        for op in ops {
            match op {
                Op::Failure(advance_ms) => {
                    now += ChronoDuration::milliseconds(advance_ms);
                    breaker.record_failure_at(now);
                }
                Op::Success => {
                    breaker.record_success();
                    prop_assert_eq!(breaker.state(), CircuitState::default());
                }
                Op::Allow(advance_ms) => {
                    now += ChronoDuration::milliseconds(advance_ms);
                    let before = breaker.state().state;
                    let allowed = breaker.allow_at(now);
                    if before == BreakerState::Closed {
                        prop_assert!(allowed);
                    }
                    if !allowed {
                        prop_assert_ne!(breaker.state().state, BreakerState::Closed);
                    }
                }
            }

            let state = breaker.state();
            match state.state {
                BreakerState::Closed => prop_assert!(state.failures < config.failure_threshold),
                BreakerState::Open => prop_assert!(state.tripped_at.is_some()),
                BreakerState::HalfOpen => prop_assert!(state.probe_started_at.is_some()),
            }
        }
    }
}
