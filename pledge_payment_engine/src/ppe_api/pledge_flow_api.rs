use std::fmt::Debug;

use chrono::{DateTime, Utc};
use log::*;
use rand::Rng;

use crate::{
    db_types::{
        NewPaymentIntent,
        NewPledge,
        PaymentEventOutcome,
        PaymentStatus,
        PaymentTransaction,
        Pledge,
        PledgeId,
        StateTransition,
    },
    traits::{PaymentGatewayError, PledgeGatewayDatabase},
};

/// `PledgeFlowApi` is the primary API for the pledge write path and the payment lifecycle: pledge intake (the
/// outbox writer), payment intent creation, and driving the payment state machine with gateway events.
pub struct PledgeFlowApi<B> {
    db: B,
}

impl<B> Debug for PledgeFlowApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PledgeFlowApi")
    }
}

impl<B> PledgeFlowApi<B> {
    pub fn new(db: B) -> Self {
        Self { db }
    }
}

impl<B> PledgeFlowApi<B>
where B: PledgeGatewayDatabase
{
    /// Records a new pledge. The pledge row and its `PledgeCreated` outbox event are committed in one atomic
    /// transaction, so the relay can never observe one without the other. The call is idempotent on the pledge id:
    /// resubmitting an existing pledge returns the stored record with `created = false` and writes nothing.
    pub async fn submit_pledge(&self, pledge: NewPledge) -> Result<(Pledge, bool), PaymentGatewayError> {
        let (pledge, created) = self.db.insert_pledge(pledge).await?;
        if created {
            info!("🪙️ Pledge [{}] of {} recorded for campaign {}", pledge.pledge_id, pledge.amount, pledge.campaign_id);
        }
        Ok((pledge, created))
    }

    pub async fn pledge(&self, pledge_id: &PledgeId) -> Result<Option<Pledge>, PaymentGatewayError> {
        self.db.fetch_pledge(pledge_id).await
    }

    /// Creates the payment transaction for a pledge, in `INITIATED` status, under a freshly generated external
    /// reference. The reference is what the gateway echoes back in webhook deliveries.
    pub async fn create_payment_intent(&self, pledge_id: &PledgeId) -> Result<PaymentTransaction, PaymentGatewayError> {
        let pledge = self
            .db
            .fetch_pledge(pledge_id)
            .await?
            .ok_or_else(|| PaymentGatewayError::PledgeNotFound(pledge_id.clone()))?;
        let reference = new_payment_reference();
        let intent =
            NewPaymentIntent { pledge_id: pledge.pledge_id.clone(), amount: pledge.amount, currency: pledge.currency };
        let payment = self.db.create_payment_intent(intent, &reference).await?;
        info!("💳️ Payment intent [{reference}] created for pledge {pledge_id}");
        Ok(payment)
    }

    /// Drives the payment state machine with one gateway event.
    ///
    /// Callers on externally-retriable paths must route through [`crate::IdempotencyGate`] first; the gate absorbs
    /// retried deliveries of the *same* event, while the staleness check inside the state machine guards against
    /// *different* events arriving out of order.
    pub async fn process_payment_event(
        &self,
        external_reference: &str,
        new_status: PaymentStatus,
        event_timestamp: DateTime<Utc>,
        event_id: &str,
    ) -> Result<PaymentEventOutcome, PaymentGatewayError> {
        trace!("💳️ Applying event {event_id} ({new_status}) to payment [{external_reference}]");
        let outcome = self.db.apply_payment_event(external_reference, new_status, event_timestamp, event_id).await?;
        match &outcome {
            PaymentEventOutcome::Processed { old_status, new_status, version } => {
                debug!("💳️ [{external_reference}] processed: {old_status} -> {new_status}, version {version}")
            },
            PaymentEventOutcome::Ignored => {
                debug!("💳️ [{external_reference}] event {event_id} arrived out of order and was ignored")
            },
            PaymentEventOutcome::Rejected { from, to } => {
                warn!("💳️ [{external_reference}] event {event_id} requested an invalid transition {from} -> {to}")
            },
        }
        Ok(outcome)
    }

    /// The payment and its full audit trail, for status queries.
    pub async fn payment_status(
        &self,
        external_reference: &str,
    ) -> Result<(PaymentTransaction, Vec<StateTransition>), PaymentGatewayError> {
        let payment = self
            .db
            .fetch_payment_by_reference(external_reference)
            .await?
            .ok_or_else(|| PaymentGatewayError::PaymentNotFound(external_reference.to_string()))?;
        let history = self.db.fetch_payment_history(payment.id).await?;
        Ok((payment, history))
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}

/// A gateway-style opaque reference: `pi_` followed by 24 hex characters.
fn new_payment_reference() -> String {
    let mut rng = rand::thread_rng();
    format!("pi_{:016x}{:08x}", rng.gen::<u64>(), rng.gen::<u32>())
}
