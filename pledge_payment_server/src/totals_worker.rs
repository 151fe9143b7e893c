//! The totals invalidation worker.
//!
//! Subscribes to the broker and reacts to `PaymentCaptured` completion events by invalidating the hot-cache entry
//! for the affected campaign and rebuilding its snapshot. Everything it touches is advisory, so a missed message
//! (e.g. after a lagged channel) only delays convergence until the hot entry's TTL runs out.
use log::*;
use pledge_payment_engine::{
    events::{BrokerMessage, OutboxEventType, PaymentCapturedPayload},
    SqliteDatabase,
    TotalsApi,
};
use tokio::{sync::broadcast, task::JoinHandle};

/// Starts the invalidation worker. Do not await the returned JoinHandle; it runs until the broker channel closes.
pub fn start_totals_worker(
    api: TotalsApi<SqliteDatabase>,
    mut subscription: broadcast::Receiver<BrokerMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("♻️ Totals invalidation worker started");
        loop {
            match subscription.recv().await {
                Ok(message) if message.event_type == OutboxEventType::PaymentCaptured => {
                    handle_capture(&api, message).await;
                },
                Ok(_) => {},
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("♻️ Invalidation worker lagged and skipped {n} events; stale hot entries will age out");
                },
                Err(broadcast::error::RecvError::Closed) => {
                    info!("♻️ Broker channel closed; totals invalidation worker stopping");
                    break;
                },
            }
        }
    })
}

async fn handle_capture(api: &TotalsApi<SqliteDatabase>, message: BrokerMessage) {
    let payload: PaymentCapturedPayload = match serde_json::from_value(message.payload) {
        Ok(payload) => payload,
        Err(e) => {
            error!("♻️ Completion event {} carries an unreadable payload: {e}", message.id);
            return;
        },
    };
    debug!(
        "♻️ Payment [{}] captured for campaign {}; invalidating totals",
        payload.external_reference, payload.campaign_id
    );
    if let Err(e) = api.invalidate(&payload.campaign_id).await {
        error!("♻️ Could not invalidate totals for campaign {}: {e}", payload.campaign_id);
    }
}
