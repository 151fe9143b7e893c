//! Tests of the idempotency gate against a real durable tier.
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use chrono::Duration;
use pledge_payment_engine::{
    cache::TtlCache,
    db_types::StoredResponse,
    IdempotencyGate,
    PaymentGatewayError,
    SqliteDatabase,
};

mod support;

fn gate(db: SqliteDatabase) -> IdempotencyGate<SqliteDatabase> {
    IdempotencyGate::new(db, TtlCache::new(std::time::Duration::from_secs(300)), Duration::hours(24))
}

#[tokio::test]
async fn first_admission_computes_replay_does_not() {
    let db = support::prepare_test_env().await;
    let gate = gate(db);
    let executions = Arc::new(AtomicU32::new(0));

    let exec = executions.clone();
    let (first, was_duplicate) = gate
        .admit("key-1", || async move {
            exec.fetch_add(1, Ordering::SeqCst);
            Ok(StoredResponse::new(200, r#"{"status":"processed","version":2}"#))
        })
        .await
        .unwrap();
    assert!(!was_duplicate);

    let exec = executions.clone();
    let (replay, was_duplicate) = gate
        .admit("key-1", || async move {
            exec.fetch_add(1, Ordering::SeqCst);
            Ok(StoredResponse::new(200, "should never run"))
        })
        .await
        .unwrap();
    assert!(was_duplicate);
    assert_eq!(replay, first, "retries must receive the byte-identical stored response");
    assert_eq!(executions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn durable_tier_survives_a_cold_fast_tier() {
    let db = support::prepare_test_env().await;
    let warm = gate(db.clone());
    let (first, _) = warm.admit("key-2", || async { Ok(StoredResponse::new(200, "{}")) }).await.unwrap();

    // A different gate instance models a different process with an empty fast tier.
    let cold = gate(db);
    let (replay, was_duplicate) =
        cold.admit("key-2", || async { Ok(StoredResponse::new(200, "should never run")) }).await.unwrap();
    assert!(was_duplicate);
    assert_eq!(replay, first);
}

#[tokio::test]
async fn concurrent_identical_requests_compute_exactly_once() {
    let db = support::prepare_test_env().await;
    let gate = Arc::new(gate(db));
    let executions = Arc::new(AtomicU32::new(0));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let gate = Arc::clone(&gate);
        let executions = Arc::clone(&executions);
        handles.push(tokio::spawn(async move {
            gate.admit("key-3", || async move {
                executions.fetch_add(1, Ordering::SeqCst);
                // keep the claim open long enough for the other requests to pile up behind it
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                Ok(StoredResponse::new(200, r#"{"status":"processed"}"#))
            })
            .await
        }));
    }

    let mut bodies = Vec::new();
    let mut winners = 0;
    for handle in handles {
        let (response, was_duplicate) = handle.await.unwrap().unwrap();
        if !was_duplicate {
            winners += 1;
        }
        bodies.push(response.body);
    }
    assert_eq!(executions.load(Ordering::SeqCst), 1, "the side effect must run exactly once");
    assert_eq!(winners, 1);
    assert!(bodies.iter().all(|b| b == &bodies[0]), "all callers must see the identical response");
}

#[tokio::test]
async fn distinct_keys_do_not_collide() {
    let db = support::prepare_test_env().await;
    let gate = gate(db);
    let (a, _) = gate.admit("key-a", || async { Ok(StoredResponse::new(200, "a")) }).await.unwrap();
    let (b, _) = gate.admit("key-b", || async { Ok(StoredResponse::new(200, "b")) }).await.unwrap();
    assert_ne!(a, b);
}

#[tokio::test]
async fn failed_computation_releases_the_claim() {
    let db = support::prepare_test_env().await;
    let gate = gate(db);

    let err = gate
        .admit("key-4", || async {
            Err::<StoredResponse, _>(PaymentGatewayError::PaymentNotFound("pi_gone".to_string()))
        })
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentGatewayError::PaymentNotFound(_)));

    // the key was not burned: the retry computes for real
    let (response, was_duplicate) =
        gate.admit("key-4", || async { Ok(StoredResponse::new(200, "recovered")) }).await.unwrap();
    assert!(!was_duplicate);
    assert_eq!(response.body, "recovered");
}
