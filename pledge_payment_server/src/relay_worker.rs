//! The outbox relay.
//!
//! A background worker that polls unpublished outbox events in creation order, publishes each to the broker under a
//! bounded timeout, and marks it processed only after a positive acknowledgment. Failures of any kind increment the
//! event's retry count and leave it in place for the next poll; nothing here ever drops an event.
//!
//! The relay is effectively single-writer: every tick starts by taking (or renewing) the database lease, and a
//! replica that does not hold the lease skips the tick entirely. Downstream consumers must still be idempotent —
//! a relay crash between publish and mark republishes the event.
use log::*;
use pledge_payment_engine::{
    events::{BrokerMessage, EventPublisher, InMemoryBroker},
    PledgeGatewayDatabase,
    SqliteDatabase,
};
use tokio::task::JoinHandle;

use crate::config::RelayConfig;

/// How many poll ticks pass between cleanup sweeps of old processed events and expired idempotency keys.
const CLEANUP_EVERY_TICKS: u64 = 100;

/// Starts the relay worker. Do not await the returned JoinHandle, as it will run indefinitely.
pub fn start_relay_worker(db: SqliteDatabase, broker: InMemoryBroker, config: RelayConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(config.poll_interval);
        info!("📨️ Outbox relay started as {} (poll every {:?})", config.holder_id, config.poll_interval);
        let mut tick = 0u64;
        loop {
            timer.tick().await;
            match db.try_acquire_relay_lease(&config.holder_id, config.lease_ttl).await {
                Ok(true) => {},
                Ok(false) => {
                    debug!("📨️ Another relay holds the lease; skipping this tick");
                    continue;
                },
                Err(e) => {
                    error!("📨️ Could not check the relay lease: {e}");
                    continue;
                },
            }
            relay_pass(&db, &broker, &config).await;
            tick += 1;
            if tick % CLEANUP_EVERY_TICKS == 0 {
                run_cleanup(&db, &config).await;
            }
        }
    })
}

/// One relay pass: fetch a batch and walk it oldest-first. Per-event failures are recorded and the pass moves on;
/// no event blocks the ones behind it for longer than one publish attempt.
async fn relay_pass(db: &SqliteDatabase, broker: &InMemoryBroker, config: &RelayConfig) {
    let events = match db.fetch_unpublished_events(config.batch_size, config.max_retries).await {
        Ok(events) => events,
        Err(e) => {
            error!("📨️ Could not fetch outbox events: {e}");
            return;
        },
    };
    if events.is_empty() {
        return;
    }
    debug!("📨️ Relaying {} outbox events", events.len());
    let mut published = 0usize;
    for event in &events {
        // A malformed payload is not retryable: record the failure so the ceiling parks it, and keep it loud in
        // the logs for operators.
        let message = match BrokerMessage::try_from(event) {
            Ok(message) => message,
            Err(e) => {
                error!("💥️ Unpublishable outbox event: {e}");
                record_failure(db, event.id).await;
                continue;
            },
        };
        match tokio::time::timeout(config.publish_timeout, broker.publish(&message)).await {
            Ok(Ok(())) => {
                if let Err(e) = db.mark_event_processed(event.id).await {
                    // The publish went out but the mark failed; the event will be republished next poll, which
                    // consumers must tolerate anyway.
                    error!("📨️ Published event {} but could not mark it processed: {e}", event.id);
                } else {
                    published += 1;
                }
            },
            Ok(Err(e)) => {
                warn!("📨️ Publish of event {} failed: {e}", event.id);
                record_failure(db, event.id).await;
            },
            Err(_) => {
                warn!("📨️ Publish of event {} timed out after {:?}", event.id, config.publish_timeout);
                record_failure(db, event.id).await;
            },
        }
    }
    info!("📨️ Relay pass complete: {published}/{} events published", events.len());
}

async fn record_failure(db: &SqliteDatabase, event_id: i64) {
    if let Err(e) = db.record_publish_failure(event_id).await {
        error!("📨️ Could not record publish failure for event {event_id}: {e}");
    }
}

async fn run_cleanup(db: &SqliteDatabase, config: &RelayConfig) {
    match db.purge_processed_events(config.purge_after).await {
        Ok(0) => {},
        Ok(n) => info!("🧹️ Purged {n} old processed outbox events"),
        Err(e) => error!("🧹️ Could not purge processed outbox events: {e}"),
    }
    match db.purge_expired_idempotency_keys().await {
        Ok(0) => {},
        Ok(n) => info!("🧹️ Purged {n} expired idempotency keys"),
        Err(e) => error!("🧹️ Could not purge expired idempotency keys: {e}"),
    }
}
