//! Tests of the outbox pipeline from the write path through to an acknowledged broker delivery.
use ppg_common::Money;
use pledge_payment_engine::{
    db_types::{NewPledge, PledgeId},
    events::{BrokerMessage, EventPublisher, InMemoryBroker, OutboxEventType},
    PledgeFlowApi,
    PledgeGatewayDatabase,
};

mod support;

#[tokio::test]
async fn written_events_flow_through_the_broker_and_are_marked_processed() {
    let db = support::prepare_test_env().await;
    let api = PledgeFlowApi::new(db.clone());
    let broker = InMemoryBroker::new(16);
    let mut subscriber = broker.subscribe();

    let pledge = NewPledge::new(PledgeId::from("pl-relay".to_string()), "camp-r", "a@b.c", Money::from(750));
    api.submit_pledge(pledge).await.unwrap();

    // One relay pass: fetch, validate, publish, mark.
    let events = db.fetch_unpublished_events(10, 10).await.unwrap();
    assert_eq!(events.len(), 1);
    for event in &events {
        let message = BrokerMessage::try_from(event).unwrap();
        broker.publish(&message).await.unwrap();
        db.mark_event_processed(event.id).await.unwrap();
    }

    let received = subscriber.recv().await.unwrap();
    assert_eq!(received.event_type, OutboxEventType::PledgeCreated);
    assert_eq!(received.aggregate_id, "pl-relay");
    assert_eq!(received.payload["campaign_id"], "camp-r");

    // marked processed: the next pass sees nothing
    assert!(db.fetch_unpublished_events(10, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_publish_leaves_the_event_for_the_next_poll() {
    let db = support::prepare_test_env().await;
    let api = PledgeFlowApi::new(db.clone());
    // no subscriber: every publish fails, which models a broker outage
    let broker = InMemoryBroker::new(16);

    let pledge = NewPledge::new(PledgeId::from("pl-outage".to_string()), "camp-r", "a@b.c", Money::from(750));
    api.submit_pledge(pledge).await.unwrap();

    let events = db.fetch_unpublished_events(10, 10).await.unwrap();
    let message = BrokerMessage::try_from(&events[0]).unwrap();
    assert!(broker.publish(&message).await.is_err());
    db.record_publish_failure(events[0].id).await.unwrap();

    // the event is still there, with the failure recorded, and is retried on the next poll
    let retried = db.fetch_unpublished_events(10, 10).await.unwrap();
    assert_eq!(retried.len(), 1);
    assert_eq!(retried[0].retry_count, 1);
    assert!(retried[0].processed_at.is_none());

    // once a consumer is back, the retry goes through
    let mut subscriber = broker.subscribe();
    broker.publish(&message).await.unwrap();
    db.mark_event_processed(retried[0].id).await.unwrap();
    assert_eq!(subscriber.recv().await.unwrap().id, message.id);
    assert!(db.fetch_unpublished_events(10, 10).await.unwrap().is_empty());
}
