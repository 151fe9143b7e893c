//! End-to-end tests of the payment state machine, driven through the public flow API.
use chrono::{Duration, Utc};
use ppg_common::Money;
use pledge_payment_engine::{
    db_types::{NewPledge, PaymentEventOutcome, PaymentStatus, PledgeId, PledgeStatus},
    PaymentGatewayError,
    PledgeFlowApi,
    PledgeGatewayDatabase,
    SqliteDatabase,
};

mod support;

async fn pledge_with_intent(
    api: &PledgeFlowApi<SqliteDatabase>,
    pledge_id: &str,
    campaign_id: &str,
) -> (PledgeId, String) {
    let pledge_id = PledgeId::from(pledge_id.to_string());
    let pledge = NewPledge::new(pledge_id.clone(), campaign_id, "donor@example.com", Money::from(2_500));
    let (_, created) = api.submit_pledge(pledge).await.unwrap();
    assert!(created);
    let payment = api.create_payment_intent(&pledge_id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Initiated);
    assert_eq!(payment.version, 1);
    (pledge_id, payment.external_reference)
}

#[tokio::test]
async fn accepted_transition_bumps_version_and_logs_audit_row() {
    let db = support::prepare_test_env().await;
    let api = PledgeFlowApi::new(db);
    let (_, reference) = pledge_with_intent(&api, "pl-auth", "camp-a").await;

    let outcome = api
        .process_payment_event(&reference, PaymentStatus::Authorized, Utc::now(), "evt-1")
        .await
        .unwrap();
    assert_eq!(
        outcome,
        PaymentEventOutcome::Processed {
            old_status: PaymentStatus::Initiated,
            new_status: PaymentStatus::Authorized,
            version: 2
        }
    );

    let (payment, history) = api.payment_status(&reference).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Authorized);
    assert_eq!(payment.version, 2);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].from_status, PaymentStatus::Initiated);
    assert_eq!(history[0].to_status, PaymentStatus::Authorized);
    assert_eq!(history[0].event_id, "evt-1");
    assert_eq!(history[0].version, 2);
}

#[tokio::test]
async fn stale_event_is_ignored_without_mutation() {
    let db = support::prepare_test_env().await;
    let api = PledgeFlowApi::new(db);
    let (_, reference) = pledge_with_intent(&api, "pl-stale", "camp-a").await;

    let t_auth = Utc::now();
    api.process_payment_event(&reference, PaymentStatus::Authorized, t_auth, "evt-1").await.unwrap();

    // A capture that happened *before* the authorization we already saw. Even though the transition itself would be
    // valid, the event is older than the current state and must be soft-ignored.
    let outcome = api
        .process_payment_event(&reference, PaymentStatus::Captured, t_auth - Duration::seconds(5), "evt-0")
        .await
        .unwrap();
    assert_eq!(outcome, PaymentEventOutcome::Ignored);

    let (payment, history) = api.payment_status(&reference).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Authorized);
    assert_eq!(payment.version, 2);
    assert_eq!(history.len(), 1, "an ignored event must not leave an audit row");
}

#[tokio::test]
async fn invalid_transition_is_rejected_without_mutation() {
    let db = support::prepare_test_env().await;
    let api = PledgeFlowApi::new(db);
    let (_, reference) = pledge_with_intent(&api, "pl-reject", "camp-a").await;

    let outcome =
        api.process_payment_event(&reference, PaymentStatus::Captured, Utc::now(), "evt-1").await.unwrap();
    assert_eq!(
        outcome,
        PaymentEventOutcome::Rejected { from: PaymentStatus::Initiated, to: PaymentStatus::Captured }
    );

    let (payment, history) = api.payment_status(&reference).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Initiated);
    assert_eq!(payment.version, 1);
    assert!(history.is_empty());
}

#[tokio::test]
async fn terminal_states_accept_nothing() {
    let db = support::prepare_test_env().await;
    let api = PledgeFlowApi::new(db);
    let (_, reference) = pledge_with_intent(&api, "pl-terminal", "camp-a").await;

    let t = Utc::now();
    api.process_payment_event(&reference, PaymentStatus::Failed, t, "evt-1").await.unwrap();
    let outcome = api
        .process_payment_event(&reference, PaymentStatus::Authorized, t + Duration::seconds(5), "evt-2")
        .await
        .unwrap();
    assert_eq!(
        outcome,
        PaymentEventOutcome::Rejected { from: PaymentStatus::Failed, to: PaymentStatus::Authorized }
    );
}

#[tokio::test]
async fn capture_completes_the_pledge_and_writes_a_completion_event() {
    let db = support::prepare_test_env().await;
    let api = PledgeFlowApi::new(db.clone());
    let (pledge_id, reference) = pledge_with_intent(&api, "pl-capture", "camp-a").await;

    let t = Utc::now();
    api.process_payment_event(&reference, PaymentStatus::Authorized, t, "evt-1").await.unwrap();
    let outcome = api
        .process_payment_event(&reference, PaymentStatus::Captured, t + Duration::seconds(2), "evt-2")
        .await
        .unwrap();
    assert_eq!(
        outcome,
        PaymentEventOutcome::Processed {
            old_status: PaymentStatus::Authorized,
            new_status: PaymentStatus::Captured,
            version: 3
        }
    );

    let pledge = api.pledge(&pledge_id).await.unwrap().unwrap();
    assert_eq!(pledge.status, PledgeStatus::Completed);

    // The intake event and the completion event both sit in the outbox, oldest first.
    let events = db.fetch_unpublished_events(10, 10).await.unwrap();
    let types = events.iter().map(|e| e.event_type.as_str()).collect::<Vec<_>>();
    assert_eq!(types, vec!["PledgeCreated", "PaymentCaptured"]);
    let completion: serde_json::Value = serde_json::from_str(&events[1].payload).unwrap();
    assert_eq!(completion["campaign_id"], "camp-a");
    assert_eq!(completion["event_id"], "evt-2");
    assert_eq!(completion["amount"], 2_500);
}

#[tokio::test]
async fn unknown_payment_reference_is_an_error() {
    let db = support::prepare_test_env().await;
    let api = PledgeFlowApi::new(db);
    let err = api
        .process_payment_event("pi_does_not_exist", PaymentStatus::Authorized, Utc::now(), "evt-1")
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentGatewayError::PaymentNotFound(_)));
}

#[tokio::test]
async fn resubmitted_pledge_writes_nothing_new() {
    let db = support::prepare_test_env().await;
    let api = PledgeFlowApi::new(db.clone());
    let pledge_id = PledgeId::from("pl-resubmit".to_string());
    let pledge = NewPledge::new(pledge_id.clone(), "camp-a", "donor@example.com", Money::from(1_000));
    let (first, created) = api.submit_pledge(pledge.clone()).await.unwrap();
    assert!(created);
    let (second, created) = api.submit_pledge(pledge).await.unwrap();
    assert!(!created);
    assert_eq!(first.id, second.id);
    // exactly one outbox event for the pledge, not two
    let events = db.fetch_unpublished_events(10, 10).await.unwrap();
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn second_payment_intent_for_a_pledge_is_refused() {
    let db = support::prepare_test_env().await;
    let api = PledgeFlowApi::new(db);
    let (pledge_id, _) = pledge_with_intent(&api, "pl-twice", "camp-a").await;
    let err = api.create_payment_intent(&pledge_id).await.unwrap_err();
    assert!(matches!(err, PaymentGatewayError::PaymentIntentAlreadyExists(_)));
}
